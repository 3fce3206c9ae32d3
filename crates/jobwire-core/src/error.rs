//! Error types for jobwire.
//!
//! A single error enum covers connection, framing, and per-job failures so
//! callers can match on one type whether a call failed locally or remotely.

use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::{FrameError, RequestId, RpcFailure};

/// Main error type for the jobwire client.
#[derive(Debug, Error)]
pub enum JobwireError {
    // Connection errors
    #[error("Connection is not open")]
    NotConnected,

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    // Job errors
    #[error("Request id {id} is already registered")]
    DuplicateRequestId { id: RequestId },

    #[error("Job {id} failed: {failure}")]
    Remote { id: RequestId, failure: RpcFailure },

    #[error("Job {id} was cancelled: {failure}")]
    Cancelled { id: RequestId, failure: RpcFailure },

    #[error("Job {id} lost its connection before completing")]
    ConnectionClosed { id: RequestId },

    #[error("Job {id} was abandoned by the dispatcher")]
    Abandoned { id: RequestId },

    #[error("Job {id} callback panicked: {message}")]
    Callback { id: RequestId, message: String },

    #[error("Dispatcher has stopped")]
    DispatcherStopped,

    #[error("Request ids exhausted")]
    IdsExhausted,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for jobwire operations.
pub type Result<T> = std::result::Result<T, JobwireError>;

impl From<std::io::Error> for JobwireError {
    fn from(err: std::io::Error) -> Self {
        JobwireError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for JobwireError {
    fn from(err: serde_json::Error) -> Self {
        JobwireError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl JobwireError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        JobwireError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a transport error from an IO failure on the channel.
    pub fn transport(err: std::io::Error) -> Self {
        JobwireError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// The server-reported failure behind this error, if any.
    ///
    /// Both ordinary failures and cancellation acknowledgments carry one.
    pub fn failure(&self) -> Option<&RpcFailure> {
        match self {
            JobwireError::Remote { failure, .. } | JobwireError::Cancelled { failure, .. } => {
                Some(failure)
            }
            _ => None,
        }
    }

    /// Check if the job ended because the server acknowledged a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobwireError::Cancelled { .. })
    }

    /// Check if the job never reached a server-side verdict.
    pub fn is_abandoned(&self) -> bool {
        matches!(
            self,
            JobwireError::Abandoned { .. } | JobwireError::ConnectionClosed { .. }
        )
    }
}
