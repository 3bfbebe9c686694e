//! Errors surfaced to remote clients.

use std::io;

use thiserror::Error;

use crate::barrier::WaitError;
use crate::dispatch::JobError;
use crate::memwatch::WatchError;

/// JSON-RPC error codes.
pub mod code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const SERVER_ERROR: i32 = -32000;
}

/// Everything a request can fail with.
///
/// Validation problems are the client's fault and are reported with
/// [`code::INVALID_PARAMS`]; everything else is a server-side failure.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid memory watch: {0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("{0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("PNG encode error: {0}")]
    Png(#[from] png::EncodingError),
}

impl RemoteError {
    /// Shorthand for a validation failure.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// JSON-RPC error code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) | Self::Watch(_) | Self::Wait(WaitError::ZeroFrames) => {
                code::INVALID_PARAMS
            }
            Self::UnknownMethod(_) => code::METHOD_NOT_FOUND,
            _ => code::SERVER_ERROR,
        }
    }

    /// True if the request was malformed rather than the server failing.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.code() != code::SERVER_ERROR
    }
}
