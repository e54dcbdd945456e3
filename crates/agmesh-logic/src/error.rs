use std::fmt;

/// Result type for script evaluation
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the script sandbox
#[derive(Debug)]
pub enum Error {
    /// The script failed to parse
    Syntax(String),

    /// The script threw, or the engine rejected it at runtime
    Script(String),

    /// The script ran past its deadline
    Timeout,

    /// The script returned a value the caller's contract rejects
    Contract(String),

    /// Host data could not cross the JSON bridge
    Encoding(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax(msg) => write!(f, "Script syntax error: {}", msg),
            Error::Script(msg) => write!(f, "Script error: {}", msg),
            Error::Timeout => write!(f, "Script timed out"),
            Error::Contract(msg) => write!(f, "Script contract violation: {}", msg),
            Error::Encoding(err) => write!(f, "Encoding error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err)
    }
}
