//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the bridge protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bridge id is not 12 hexadecimal characters.
    #[error("invalid bridge id {0:?}: expected 12 hex characters")]
    InvalidBridgeId(String),

    /// Datagram is too short to be valid.
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Bytes 1..=3 of the header are not zero.
    #[error("malformed header for message type 0x{0:02X}")]
    HeaderMismatch(u8),

    /// Length byte does not match the datagram length.
    #[error("length field mismatch: header says {declared}, payload has {actual}")]
    LengthMismatch {
        /// Length announced in the header.
        declared: usize,
        /// Payload length actually received.
        actual: usize,
    },

    /// Unknown message type byte.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    /// Command data does not fit into a frame.
    #[error("too much command data: maximum {max} bytes, got {actual}")]
    TooMuchData {
        /// Maximum number of data bytes.
        max: usize,
        /// Number of data bytes supplied.
        actual: usize,
    },

    /// Command value outside of its valid range.
    #[error("value {value} out of range 0..={max}")]
    ValueOutOfRange {
        /// Value supplied.
        value: u8,
        /// Largest valid value.
        max: u8,
    },

    /// Bulb type does not support this command.
    #[error("{command} is not supported by {bulb} bulbs")]
    Unsupported {
        /// Command name.
        command: &'static str,
        /// Bulb type name.
        bulb: &'static str,
    },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
