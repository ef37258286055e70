use thiserror::Error;
use uuid::Uuid;

use logos_docx::DocxError;

use crate::processor::SessionHandle;
use crate::storage::StoreError;

/// Errors surfaced by the history engine.
///
/// Every failure is returned to the caller of the request that caused it;
/// nothing here aborts the process or affects other sessions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("Out of order append for document {document_id}: expected seq {expected}, got {got}")]
    OutOfOrderSequence { document_id: Uuid, expected: u64, got: u64 },
    #[error("Stale snapshot for document {document_id}: seq {seq} is not after {latest}")]
    StaleSnapshot { document_id: Uuid, seq: u64, latest: u64 },
    #[error("Sequence {seq} not found for document {document_id} (head is {head})")]
    SequenceNotFound { document_id: Uuid, seq: u64, head: u64 },
    #[error("Unknown document: {0}")]
    UnknownDocument(Uuid),
    #[error(transparent)]
    Docx(#[from] DocxError),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    #[error("Session not found: {0}")]
    SessionNotFound(SessionHandle),
    #[error("Document {0} already has an open session")]
    DocumentBusy(Uuid),
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error("Nothing to redo")]
    NothingToRedo,
    #[error("Document processor is shut down")]
    Closed,
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<StoreError> for HistoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::OutOfOrderSequence { document_id, expected, got } => {
                HistoryError::OutOfOrderSequence { document_id, expected, got }
            }
            StoreError::StaleSnapshot { document_id, seq, latest } => {
                HistoryError::StaleSnapshot { document_id, seq, latest }
            }
            other => HistoryError::Storage(other),
        }
    }
}

impl From<tokio::task::JoinError> for HistoryError {
    fn from(e: tokio::task::JoinError) -> Self {
        HistoryError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
