//! Driver errors.

use core::time::Duration;
use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Driver errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Error from the engine.
    #[error("Engine error: {0}")]
    Engine(#[from] mtp_core::Error),

    /// Wall-clock deadline of the driver elapsed.
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),
}

impl Error {
    /// Engine error, if this wraps one.
    pub fn engine(&self) -> Option<&mtp_core::Error> {
        match self {
            Error::Engine(e) => Some(e),
            Error::Timeout(_) => None,
        }
    }
}
