use std::fmt;

/// Result type for switchyard-runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer.
#[derive(Debug)]
pub enum Error {
    /// Storage layer error.
    Store(switchyard_store::Error),

    /// Catalog layer error.
    Catalog(switchyard_catalog::Error),

    /// Engine layer error.
    Engine(switchyard_engine::Error),

    /// IO operation failed.
    Io(std::io::Error),

    /// Requested flow is not registered.
    UnknownFlow(String),

    /// Resume was requested for a run with no saved state.
    NoSavedState(String),

    /// Navigator produced an unusable result.
    Navigation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Catalog(err) => write!(f, "Catalog error: {}", err),
            Error::Engine(err) => write!(f, "Engine error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::UnknownFlow(key) => write!(f, "Unknown flow: {}", key),
            Error::NoSavedState(run_id) => {
                write!(f, "Cannot resume run '{}': no saved run state", run_id)
            }
            Error::Navigation(msg) => write!(f, "Navigation error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Catalog(err) => Some(err),
            Error::Engine(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::UnknownFlow(_) | Error::NoSavedState(_) | Error::Navigation(_) => None,
        }
    }
}

impl From<switchyard_store::Error> for Error {
    fn from(err: switchyard_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<switchyard_catalog::Error> for Error {
    fn from(err: switchyard_catalog::Error) -> Self {
        Error::Catalog(err)
    }
}

impl From<switchyard_engine::Error> for Error {
    fn from(err: switchyard_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
