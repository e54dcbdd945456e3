use std::fmt;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the ledger layer
#[derive(Debug)]
pub enum Error {
    /// Underlying SQLite error
    Store(rusqlite::Error),

    /// Message content could not be serialized or deserialized
    Encoding(serde_json::Error),

    /// Invalid operation or argument
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Encoding(err) => write!(f, "Encoding error: {}", err),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Encoding(err) => Some(err),
            Error::InvalidOperation(_) => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err)
    }
}
