//! Error types for engine operations.

use crate::codes::ResponseCode;
use crate::transport::PipeId;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Engine errors.
///
/// Each variant belongs to exactly one [`FaultClass`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Endpoint stalled. Never retried by the engine.
    #[error("Pipe {pipe:?} stalled")]
    Stalled {
        /// Pipe that reported the stall.
        pipe: PipeId,
    },

    /// The transport adapter refused a submission.
    #[error("Transfer submission failed: {0}")]
    Submit(String),

    /// Device answered with a response code other than OK.
    #[error("Device responded {0}")]
    Protocol(ResponseCode),

    /// Wrapper time budget exhausted before the transaction resolved.
    #[error("Operation timed out after {elapsed_ms} ms")]
    Timeout {
        /// Host clock time spent waiting.
        elapsed_ms: u64,
    },

    /// Device removed while an operation was outstanding.
    #[error("Device disconnected")]
    Disconnected,

    /// Buffer cannot hold a declared field.
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Bytes required from the read offset.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// More than five parameters supplied for one container.
    #[error("Too many container parameters: {0} (max 5)")]
    TooManyParams(usize),

    /// Fixed-width or array read requested with a width other than 1, 2, 4 or 8.
    #[error("Unsupported field width {0}")]
    UnsupportedWidth(usize),

    /// Container header or length is inconsistent.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Property value declared with a data type code the decoder does not know.
    #[error("Unknown data type 0x{0:04X}")]
    UnknownDataType(u16),

    /// A transaction is already in flight.
    #[error("Transaction already in progress")]
    Busy,

    /// Call not valid in the current state.
    #[error("Invalid state transition")]
    InvalidState,

    /// Session has not reached Ready.
    #[error("Session not ready")]
    NotReady,

    /// Session setup failed earlier and is waiting for an explicit restart.
    #[error("Session halted after a failed setup step")]
    SessionHalted,

    /// Storage index out of range.
    #[error("Invalid storage index {0}")]
    InvalidStorageIndex(usize),

    /// Interface lacks a required endpoint.
    #[error("Missing {0} endpoint")]
    MissingEndpoint(&'static str),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Pipe-level failure reported by the transport.
    Transport,
    /// Device reported a non-OK response.
    Protocol,
    /// Time budget exceeded.
    Timeout,
    /// Device went away.
    Disconnect,
    /// Integration bug or API misuse on the caller side.
    Caller,
    /// Device sent data that does not parse.
    Malformed,
}

impl Error {
    /// Classify this error.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            Error::Stalled { .. } | Error::Submit(_) => FaultClass::Transport,
            Error::Protocol(_) => FaultClass::Protocol,
            Error::Timeout { .. } => FaultClass::Timeout,
            Error::Disconnected => FaultClass::Disconnect,
            Error::MalformedContainer(_) | Error::UnknownDataType(_) => FaultClass::Malformed,
            Error::BufferTooShort { .. }
            | Error::TooManyParams(_)
            | Error::UnsupportedWidth(_)
            | Error::Busy
            | Error::InvalidState
            | Error::NotReady
            | Error::SessionHalted
            | Error::InvalidStorageIndex(_)
            | Error::MissingEndpoint(_) => FaultClass::Caller,
        }
    }

    /// Response code carried by a protocol fault.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Error::Protocol(code) => Some(*code),
            _ => None,
        }
    }
}
