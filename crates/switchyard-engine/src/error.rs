use std::fmt;

/// Result type for switchyard-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the engine layer.
#[derive(Debug)]
pub enum Error {
    /// IO operation failed.
    Io(std::io::Error),

    /// JSON serialization or deserialization failed.
    Json(serde_json::Error),

    /// No engine registered under the requested id.
    UnknownEngine(String),

    /// Engine-side execution failure (network, subprocess, timeout).
    Execution(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::UnknownEngine(id) => write!(f, "Unknown engine: {}", id),
            Error::Execution(msg) => write!(f, "Engine execution failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::UnknownEngine(_) | Error::Execution(_) => None,
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
        Error::Json(err)
    }
}
