use std::fmt;

/// Result type for switchyard-catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while loading catalogs.
#[derive(Debug)]
pub enum Error {
    /// IO operation failed.
    Io(std::io::Error),

    /// Catalog file failed to parse.
    Parse(String),

    /// Requested flow is not in the registry.
    UnknownFlow(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Parse(msg) => write!(f, "Catalog parse error: {}", msg),
            Error::UnknownFlow(key) => write!(f, "Unknown flow: {}", key),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Parse(_) | Error::UnknownFlow(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
