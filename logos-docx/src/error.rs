use thiserror::Error;

/// Errors raised while reading, editing or writing a document.
///
/// Parse-time kinds (`MalformedPackage`, `UnsupportedPart`, `TruncatedStream`)
/// are not retryable: the input has to be fixed. `InvalidStructuralEdit` is a
/// caller logic error and is always raised before any mutation happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocxError {
    #[error("Malformed package: {0}")]
    MalformedPackage(String),
    #[error("Unsupported part: {0}")]
    UnsupportedPart(String),
    #[error("Truncated stream: {0}")]
    TruncatedStream(String),
    #[error("Invalid structural edit: {0}")]
    InvalidStructuralEdit(String),
    #[error("Revision mismatch: expected seq {expected}, got {got}")]
    RevisionMismatch { expected: u64, got: u64 },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl DocxError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DocxError::InvalidStructuralEdit(msg.into())
    }

    /// Map a quick-xml failure while reading `part`.
    pub(crate) fn from_xml(part: &str, err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                DocxError::TruncatedStream(format!("{part}: {io}"))
            }
            quick_xml::Error::Io(io) => DocxError::Io(format!("{part}: {io}")),
            quick_xml::Error::Syntax(e) => DocxError::TruncatedStream(format!("{part}: {e}")),
            other => DocxError::MalformedPackage(format!("{part}: {other}")),
        }
    }
}

impl From<std::io::Error> for DocxError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DocxError::TruncatedStream(e.to_string())
        } else {
            DocxError::Io(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DocxError>;
