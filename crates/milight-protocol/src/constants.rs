//! Protocol constants
//!
//! Message type bytes, fixed field values and timing constants of the
//! Milight V6 bridge protocol.

// ============================================================================
// Transport
// ============================================================================

/// UDP port the V6 bridge listens on.
pub const DEFAULT_PORT: u16 = 5987;

/// Length of the common header: type byte, three zero bytes, length byte.
pub const HEADER_LEN: usize = 5;

/// Length of a command, link or registration frame.
pub const COMMAND_FRAME_LEN: usize = 22;

/// Number of payload bytes that follow the command byte in a command frame.
pub const COMMAND_DATA_LEN: usize = 5;

// ============================================================================
// Outbound message types (client → bridge)
// ============================================================================

/// Search for a bridge.
pub const MSG_SEARCH: u8 = 0x10;
/// Ask the bridge for a session id.
pub const MSG_ESTABLISH_SESSION: u8 = 0x20;
/// Pre-registration. Not used by the default handshake.
pub const MSG_PRE_REGISTRATION: u8 = 0x30;
/// Registration and regular bulb commands.
pub const MSG_COMMAND: u8 = 0x80;
/// Link a bulb to a zone.
pub const MSG_LINK: u8 = 0x3D;
/// Unlink a bulb from a zone.
pub const MSG_UNLINK: u8 = 0x3E;
/// Keep the session alive.
pub const MSG_KEEP_ALIVE: u8 = 0xD0;

// ============================================================================
// Inbound message types (bridge → client)
// ============================================================================

/// Unsolicited notice from the bridge.
pub const RESP_NOTICE: u8 = 0x13;
/// Answer to [`MSG_SEARCH`].
pub const RESP_SEARCH: u8 = 0x18;
/// Answer to [`MSG_ESTABLISH_SESSION`].
pub const RESP_SESSION_ID: u8 = 0x28;
/// Answer to a registration frame.
pub const RESP_REGISTRATION: u8 = 0x80;
/// Delivery confirmation of a single command.
pub const RESP_COMMAND_ACK: u8 = 0x88;
/// Answer to [`MSG_KEEP_ALIVE`].
pub const RESP_KEEP_ALIVE: u8 = 0xD8;

// ============================================================================
// Command frame fields
// ============================================================================

/// Command byte of a regular bulb command.
pub const CMD_BULB: u8 = 0x31;
/// Command byte of the registration frame.
pub const CMD_REGISTER: u8 = 0x33;

/// Offset of the first byte covered by the checksum.
pub const CHECKSUM_START: usize = 10;
/// Offset of the last byte covered by the checksum (inclusive).
pub const CHECKSUM_END: usize = 18;

/// Vendor constant sent in the establish-session frame between the header
/// and the client session id.
pub const ESTABLISH_SESSION_MAGIC: [u8; 17] = [
    0x02, 0x62, 0x3A, 0xD5, 0xED, 0xA3, 0x01, 0xAE, 0x08, 0x2D, 0x46, 0x61, 0x41, 0xA7, 0xF6,
    0xDC, 0xAF,
];

// ============================================================================
// Session timing
// ============================================================================

/// Socket timeout while waiting for a search response (milliseconds).
pub const SEARCH_TIMEOUT_MS: u64 = 150;
/// Socket timeout while waiting for the session id (milliseconds).
pub const SESSION_ID_TIMEOUT_MS: u64 = 300;
/// Socket timeout while waiting for the registration confirmation (milliseconds).
pub const REGISTRATION_TIMEOUT_MS: u64 = 300;
/// A session without confirmation for this long is considered lost (milliseconds).
pub const SESSION_TIMEOUT_MS: u64 = 10_000;
/// A command without acknowledgement for this long is considered lost (milliseconds).
pub const MAX_PACKET_IN_FLIGHT_MS: u64 = 2_000;
