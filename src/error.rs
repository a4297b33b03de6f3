//! Error types for session lifecycle management.
//!
//! No error here is fatal to an endpoint. Each failure is scoped to at most
//! one session or one refused connection:
//!
//! - [`NetError::Allocation`] and [`NetError::ShuttingDown`] refuse a
//!   single incoming connection.
//! - [`NetError::InvalidData`] closes the offending session.
//! - [`NetError::UnrecognizedMessageKind`] is logged and, unless strict
//!   dispatch is enabled, ignored.
//! - [`NetError::Timeout`] reports a client connect attempt that ran out of
//!   time. Liveness failures never surface as errors; the watchdog closes
//!   the session with `SESSION_DIED` instead.

use std::time::Duration;

use thiserror::Error;

use crate::allocator::AllocationError;

/// Session layer errors.
#[derive(Error, Debug)]
pub enum NetError {
    /// The session identifier pool is exhausted.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Inbound bytes could not be decoded into frames.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A decoded message names a kind with no bound handler.
    #[error("Unrecognized message kind: {0}")]
    UnrecognizedMessageKind(String),

    /// Connecting to a peer did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint has been shut down and accepts no new sessions.
    #[error("Endpoint shut down")]
    ShuttingDown,

    /// Operation requires an established session.
    #[error("Session not established")]
    NotEstablished,

    /// Operation requires an authenticated session.
    #[error("Session not authenticated")]
    NotAuthenticated,

    /// The session has already been closed.
    #[error("Session closed")]
    SessionClosed,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for session layer operations
pub type Result<T> = std::result::Result<T, NetError>;

impl From<toml::de::Error> for NetError {
    fn from(err: toml::de::Error) -> Self {
        NetError::Config(err.to_string())
    }
}
