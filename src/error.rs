//! Error types

use std::time::Duration;

/// Per-message failures surfaced to clients through ack replies.
///
/// These never terminate the connection; the carried string is the
/// user-facing message placed in the `error` field of the ack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Shape or range violation in an inbound payload.
    #[error("{0}")]
    InvalidArgument(String),

    /// Unknown session, member, or message.
    #[error("{0}")]
    NotFound(String),

    /// Operation restricted to the controller attempted by another member.
    #[error("{0}")]
    Unauthorized(String),

    /// Duplicate queue URL, duplicate pending request, or stale offer.
    #[error("{0}")]
    Conflict(String),

    /// Chat rate limit tripped.
    #[error("{0}")]
    RateLimited(String),

    /// Pending request or offer no longer valid.
    #[error("{0}")]
    ExpiredOrGone(String),

    /// Handler-internal failure; safe to retry.
    #[error("{0}")]
    Transient(String),
}

impl EventError {
    /// Short machine-readable code for the taxonomy bucket.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::RateLimited(_) => "rate_limited",
            Self::ExpiredOrGone(_) => "expired_or_gone",
            Self::Transient(_) => "transient",
        }
    }
}

/// Errors raised while starting or running the server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Server is already running
    #[error("server is already running")]
    AlreadyRunning,

    /// Binding the listen socket failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address
        addr: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Socket-level failure
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Startup did not complete within the allowed time
    #[error("startup timed out after {0:?}")]
    StartupTimeout(Duration),
}
