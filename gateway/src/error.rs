//! Error type shared by the resolve, fetch, cache and delivery paths.

use axum::http::StatusCode;
use common::{ContentHandle, RangeError};
use thiserror::Error;

/// Everything that can stop a stream before or after its first byte.
///
/// `Clone` so a failed shared download can hand the same error to every
/// reader attached to it.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("content {0} not found")]
    NotFound(ContentHandle),

    #[error("no storage channel configured")]
    Unconfigured,

    #[error(transparent)]
    Range(#[from] RangeError),

    /// Remote overloaded or unreachable after the retry budget was spent
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// Remote misbehaved: contract violation, short read, unrecoverable RPC error
    #[error("remote protocol error: {0}")]
    Protocol(String),

    #[error("cache i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e.to_string())
    }
}

impl StreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            StreamError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamError::Range(RangeError::Malformed(_)) => StatusCode::BAD_REQUEST,
            StreamError::Range(RangeError::Unsatisfiable { .. }) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            StreamError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::Range(RangeError::InvalidChunkSize(_))
            | StreamError::Unconfigured
            | StreamError::Protocol(_)
            | StreamError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short body text returned to clients. Details only go to the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            StreamError::NotFound(_) => "File not found or link has expired.",
            StreamError::Range(RangeError::Malformed(_)) => "Malformed Range header.",
            StreamError::Range(RangeError::Unsatisfiable { .. }) => "",
            StreamError::Unavailable(_) => "Storage temporarily unavailable. Please retry.",
            _ => "An internal error occurred. Please try again later.",
        }
    }
}
