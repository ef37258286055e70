//! # Logos DOCX
//!
//! Document model and package I/O for the Logos versioning engine.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  edit::plan         Intent → PlannedEdit     │
//! ├──────────────────────────────────────────────┤
//! │  DocumentModel      arena + apply_operation  │
//! ├───────────────────────┬──────────────────────┤
//! │  StreamingDocxParser  │  write_package       │
//! ├───────────────────────┴──────────────────────┤
//! │  PackageReader      zip parts, owned streams │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every change to a [`DocumentModel`] is an [`Operation`] carrying its own
//! inverse. Live edits and history replay both go through
//! [`DocumentModel::apply_operation`].

pub mod edit;
pub mod error;
mod format;
pub mod model;
pub mod node;
pub mod ops;
pub mod package;
pub mod parser;
pub mod writer;
mod xml;

pub use edit::{plan, Intent};
pub use error::{DocxError, Result};
pub use model::{DocumentModel, DocumentStats, Tombstone};
pub use node::{Format, Node, NodeId, NodeKind, NodeTemplate, Subtree};
pub use ops::{Edit, OpKind, Operation, PlannedEdit};
pub use package::{NumberingDef, PackageMetadata, PackageReader, PartMap, PartStream, StyleDef};
pub use parser::{load_document, ParserState, StreamingDocxParser};
pub use writer::write_package;
