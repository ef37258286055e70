use uuid::Uuid;

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Filesystem error
    IoError(String),
    /// A stored record failed its checksum or names the wrong position
    Corrupted { document_id: Uuid, seq: u64 },
    /// A seq at or below the head has no record
    MissingOperation { document_id: Uuid, seq: u64 },
    /// Append with a seq other than head + 1
    OutOfOrderSequence { document_id: Uuid, expected: u64, got: u64 },
    /// Snapshot seq not above the newest stored snapshot
    StaleSnapshot { document_id: Uuid, seq: u64, latest: u64 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::IoError(e) => write!(f, "I/O error: {e}"),
            StoreError::Corrupted { document_id, seq } => {
                write!(f, "Corrupted record for document {document_id} at seq {seq}")
            }
            StoreError::MissingOperation { document_id, seq } => {
                write!(f, "Operation {seq} missing for document {document_id}")
            }
            StoreError::OutOfOrderSequence { document_id, expected, got } => write!(
                f,
                "Out of order append for document {document_id}: expected seq {expected}, got {got}"
            ),
            StoreError::StaleSnapshot { document_id, seq, latest } => write!(
                f,
                "Stale snapshot for document {document_id}: seq {seq} is not after {latest}"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError(e.to_string())
    }
}
