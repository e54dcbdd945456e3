use std::fmt;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the provider layer
#[derive(Debug)]
pub enum Error {
    /// No provider registered under the given name
    UnknownProvider(String),

    /// Model name not in the provider's catalog
    UnknownModel { provider: String, model: String },

    /// Model level not recognized
    UnknownLevel(String),

    /// Reasoning effort not recognized or not supported
    InvalidEffort(String),

    /// The child's output never produced a structured result
    MissingJson,

    /// The child's output indicates the task itself failed
    ExecutionFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownProvider(name) => write!(f, "Unknown provider: {}", name),
            Error::UnknownModel { provider, model } => {
                write!(f, "Model {:?} is not in the {} catalog", model, provider)
            }
            Error::UnknownLevel(level) => write!(f, "Unknown model level: {:?}", level),
            Error::InvalidEffort(effort) => write!(f, "Invalid reasoning effort: {:?}", effort),
            Error::MissingJson => write!(f, "output missing required JSON block"),
            Error::ExecutionFailed(detail) => write!(f, "Task execution failed: {}", detail),
        }
    }
}

impl std::error::Error for Error {}
