//! Milight V6 Bridge Protocol
//!
//! This crate provides the wire format used to talk to a Milight V6 (iBox)
//! WiFi bridge over UDP. Every datagram starts with a type byte, three zero
//! bytes and a length byte that counts the remaining payload.
//!
//! # Protocol Overview
//!
//! A client has to run a three step handshake before the bridge accepts
//! commands:
//!
//! - **Search** (`0x10`): answered by a search response (`0x18`) carrying the
//!   bridge MAC
//! - **Establish session** (`0x20`): answered by a session id response (`0x28`)
//! - **Registration** (`0x80`, command byte `0x33`): answered by a
//!   registration confirmation (`0x80`)
//!
//! After that the client issues commands (`0x80`, command byte `0x31`),
//! each of which is acknowledged by a `0x88` carrying its sequence number,
//! and keeps the session alive with `0xD0` / `0xD8`.
//!
//! # Example
//!
//! ```rust
//! use milight_protocol::{command_frame, BridgeId, SessionKey, MSG_COMMAND};
//!
//! let bridge: BridgeId = "AC:CF:23:F5:7A:D4".parse().unwrap();
//! let key = SessionKey { session_id: [0x10, 0x20], password: [0, 0] };
//! let frame = command_frame(MSG_COMMAND, &key, 1, 0x08, 1, &[0x04, 0x01]).unwrap();
//! assert_eq!(frame.len(), 22);
//! assert_eq!(bridge.to_string(), "ACCF23F57AD4");
//! ```

mod bridge_id;
pub mod bulb;
mod constants;
mod error;
mod frame;
mod messages;

pub use bridge_id::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
