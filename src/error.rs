use std::{error::Error as StdError, fmt, io, result::Result as StdResult};

use crate::coqtop::Location;

/// Failures of the session engine, grouped by how they are recovered.
///
/// `ParseAmbiguity`, `ProtocolReject` and `BlockedByError` are recovered into
/// document state. `ProtocolDesync` and `ChannelClosed` break the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    ParseAmbiguity { offset: usize, reason: String },
    ProtocolReject {
        message: String,
        location: Option<Location>,
    },
    ProtocolDesync(String),
    ChannelClosed,
    Timeout { elapsed_ms: u128 },
    InvalidOperation(String),
    BlockedByError,
}

impl EngineError {
    /// Whether the session can no longer talk to its prover.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolDesync(_) | Self::ChannelClosed)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseAmbiguity { offset, reason } => {
                write!(f, "Cannot split sentence at offset {offset}: {reason}")
            }
            Self::ProtocolReject {
                message,
                location: Some(loc),
            } => write!(f, "Rejected at {}-{}: {message}", loc.start, loc.stop),
            Self::ProtocolReject {
                message,
                location: None,
            } => write!(f, "Rejected: {message}"),
            Self::ProtocolDesync(msg) => write!(f, "Protocol out of sync: {msg}"),
            Self::ChannelClosed => write!(f, "Connection to coqtop lost"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "No response from coqtop after {elapsed_ms} ms")
            }
            Self::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
            Self::BlockedByError => write!(f, "Fix the error first"),
        }
    }
}

impl StdError for EngineError {}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Json(serde_json::Error),
    Engine(EngineError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Engine(e) => Some(e),
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type Result<T> = StdResult<T, Error>;
