use std::fmt;

/// Result type for agmesh-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Ledger/bus layer error
    Ledger(agmesh_ledger::Error),

    /// Script sandbox error
    Logic(agmesh_logic::Error),

    /// Provider layer error
    Provider(agmesh_providers::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Context assembly failed (unknown since value, no prompt rule, ...)
    Context(String),

    /// Template substitution failed
    Template(String),

    /// Hook execution failed
    Hook(String),

    /// Model resolution failed
    Model(String),

    /// Child task never registered or could not be spawned
    Spawn(String),

    /// Parsed output violates the configured schema
    Schema(String),

    /// Configuration or settings error
    Config(String),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ledger(err) => write!(f, "Ledger error: {}", err),
            Error::Logic(err) => write!(f, "Logic error: {}", err),
            Error::Provider(err) => write!(f, "Provider error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Context(msg) => write!(f, "Context error: {}", msg),
            Error::Template(msg) => write!(f, "Template error: {}", msg),
            Error::Hook(msg) => write!(f, "Hook error: {}", msg),
            Error::Model(msg) => write!(f, "Model resolution error: {}", msg),
            Error::Spawn(msg) => write!(f, "Spawn error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ledger(err) => Some(err),
            Error::Logic(err) => Some(err),
            Error::Provider(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<agmesh_ledger::Error> for Error {
    fn from(err: agmesh_ledger::Error) -> Self {
        Error::Ledger(err)
    }
}

impl From<agmesh_logic::Error> for Error {
    fn from(err: agmesh_logic::Error) -> Self {
        Error::Logic(err)
    }
}

impl From<agmesh_providers::Error> for Error {
    fn from(err: agmesh_providers::Error) -> Self {
        Error::Provider(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
