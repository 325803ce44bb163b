use std::fmt;

/// Result type for switchyard-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the storage layer.
#[derive(Debug)]
pub enum Error {
    /// IO operation failed.
    Io(std::io::Error),

    /// JSON serialization or deserialization failed.
    Json(serde_json::Error),

    /// Run (or one of its required artifacts) was not found.
    RunNotFound(String),

    /// run_state.json is missing at a point where the commit protocol
    /// requires it. This is fatal for the run.
    StateMissing(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::RunNotFound(run_id) => write!(f, "Run not found: {}", run_id),
            Error::StateMissing(run_id) => write!(f, "Run state not found: {}", run_id),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::RunNotFound(_) | Error::StateMissing(_) => None,
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
