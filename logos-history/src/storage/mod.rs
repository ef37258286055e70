//! Durable storage for document history.
//!
//! ```text
//! ┌────────────────┐  append(op)   ┌────────────────────────────────┐
//! │ HistoryManager │ ────────────► │ OperationLog (RocksDB)         │
//! │                │               │ CF "operations" doc‖seq → op   │
//! │                │               │ CF "heads"      doc → last seq │
//! │                │               └────────────────────────────────┘
//! │                │  write(model) ┌────────────────────────────────┐
//! │                │ ────────────► │ SnapshotStore (directory)      │
//! └────────────────┘               │ <doc>/<seq:020>.snap           │
//!                                  └────────────────────────────────┘
//! ```

pub mod error;
pub mod oplog;
pub mod record;
pub mod snapshots;

pub use error::StoreError;
pub use oplog::{OpRange, OperationLog};
pub use record::{OpRecord, SnapshotFile};
pub use snapshots::{Snapshot, SnapshotStore};
