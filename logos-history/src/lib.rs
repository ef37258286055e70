//! # logos-history: Durable version history for Logos documents
//!
//! Every accepted edit becomes an [`Operation`](logos_docx::Operation) with a
//! gap-free per-document seq, appended to a RocksDB log before the caller
//! sees the seq. Full snapshots are written in the background every
//! `snapshot_cadence` operations; any past version is rebuilt from the
//! newest snapshot at or before it plus a replay of the log.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐  Intent   ┌────────────────┐
//! │ DocumentProcessor │ ────────► │ HistorySession │  (one per open doc,
//! │ (session registry)│           │ model + undo   │   tokio::Mutex)
//! └─────────┬─────────┘           └───────┬────────┘
//!           │ get_version                 │ append / schedule
//!           ▼                             ▼
//! ┌──────────────────────────────────────────────────┐
//! │ HistoryManager                                   │
//! │   OperationLog (RocksDB)   SnapshotStore (files) │
//! │                 ▲ Snapshotter (bounded queue)    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: operation log, snapshot files, checksummed records
//! - [`snapshotter`]: background snapshot writer
//! - [`manager`]: appends, cadence and reconstruction
//! - [`session`]: live model, undo/redo, rollback on failed appends
//! - [`processor`]: the public editing surface

pub mod config;
pub mod error;
pub mod manager;
pub mod processor;
pub mod session;
pub mod snapshotter;
pub mod storage;

pub use config::HistoryConfig;
pub use error::{HistoryError, Result};
pub use manager::{HistoryManager, Reconstruction, REPLAY_YIELD_EVERY};
pub use processor::{DocumentInfo, DocumentProcessor, SessionHandle};
pub use session::HistorySession;
pub use snapshotter::{SnapshotStats, Snapshotter};
pub use storage::{OpRange, OpRecord, OperationLog, Snapshot, SnapshotFile, SnapshotStore, StoreError};
