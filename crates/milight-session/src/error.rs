//! Error types for the session layer.

use milight_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur when setting up or using a bridge session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid protocol input (bridge id, command data).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Keep-alive interval outside of the accepted range.
    #[error("invalid keep-alive interval {actual} ms: must be in {min}..{max} ms")]
    InvalidKeepAlive {
        /// Configured interval.
        actual: u64,
        /// Smallest accepted interval.
        min: u64,
        /// Exclusive upper bound (the session timeout).
        max: u64,
    },

    /// Repeat count outside of the accepted range.
    #[error("invalid repeat count {0}: must be in 1..=5")]
    InvalidRepeatCount(u8),

    /// The command queue has been closed.
    #[error("command queue closed")]
    QueueClosed,

    /// Configuration could not be read.
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
