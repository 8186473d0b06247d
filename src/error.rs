//! Error taxonomy for the multiplexer (spec.md §7).
//!
//! `OK` has no variant here — success is simply `Result::Ok`.

use thiserror::Error;

/// Kinds of failure the multiplexer can surface to a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvsError {
    #[error("invalid argument")]
    InvalidArg,

    #[error("caller does not hold the master role")]
    OwnershipLost,

    #[error("no buffer available")]
    BufferUnavailable,

    #[error("hardware camera rejected the request")]
    Underlying,

    #[error("fence-based delivery is not available for this client")]
    SyncUnsupported,

    #[error("stream is already running")]
    StreamAlreadyRunning,

    #[error("stream is not running")]
    NotStreaming,

    #[error("buffer id is not held by this client")]
    UnknownBuffer,
}

pub type EvsResult<T> = Result<T, EvsError>;
