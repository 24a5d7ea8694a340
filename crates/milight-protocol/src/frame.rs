//! Outbound frame builders.
//!
//! Every frame starts with the common header:
//!
//! ```text
//! +------+------+------+------+----------------+----------------------+
//! | type | 0x00 | 0x00 | 0x00 | len (= N - 5)  | payload[0..N-5]      |
//! +------+------+------+------+----------------+----------------------+
//! ```
//!
//! Command, link and registration frames share a fixed 22 byte layout:
//!
//! ```text
//!  0     4  5   6  7    8   9  10  11  12  13  14..18  19   20  21
//! [type 0 0 0 0x11][sid][seq lo/hi][0][cmd][ pw ][wb][ data ][zone][0][chk]
//! ```
//!
//! The checksum is the byte sum of offsets 10..=18 plus the zone, truncated
//! to a byte.

use bytes::BufMut;

use crate::bridge_id::BridgeId;
use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// Session id and password stamped into every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionKey {
    /// Session id assigned by the bridge.
    pub session_id: [u8; 2],
    /// Bridge password bytes.
    pub password: [u8; 2],
}

fn put_header(buf: &mut Vec<u8>, msg_type: u8, total_len: usize) {
    buf.put_u8(msg_type);
    buf.put_bytes(0, 3);
    buf.put_u8((total_len - HEADER_LEN) as u8);
}

/// Compute the checksum of a command frame.
pub fn checksum(frame: &[u8], zone: u8) -> u8 {
    frame[CHECKSUM_START..=CHECKSUM_END]
        .iter()
        .fold(zone, |acc, b| acc.wrapping_add(*b))
}

fn framed(
    msg_type: u8,
    command: u8,
    key: &SessionKey,
    sequence: u16,
    wb: u8,
    zone: u8,
    data: &[u8],
) -> Vec<u8> {
    debug_assert!(data.len() <= COMMAND_DATA_LEN);

    let mut buf = Vec::with_capacity(COMMAND_FRAME_LEN);
    put_header(&mut buf, msg_type, COMMAND_FRAME_LEN);
    buf.put_slice(&key.session_id);
    buf.put_u16_le(sequence);
    buf.put_u8(0);
    buf.put_u8(command);
    buf.put_slice(&key.password);
    buf.put_u8(wb);
    buf.put_slice(data);
    buf.put_bytes(0, COMMAND_DATA_LEN - data.len());
    buf.put_u8(zone);
    buf.put_u8(0);
    let chk = checksum(&buf, zone);
    buf.put_u8(chk);
    buf
}

/// Build a bulb command frame.
///
/// `msg_type` is normally [`MSG_COMMAND`]. `data` holds the bulb command
/// byte and up to four arguments; it is zero padded to five bytes.
pub fn command_frame(
    msg_type: u8,
    key: &SessionKey,
    sequence: u16,
    wb: u8,
    zone: u8,
    data: &[u8],
) -> ProtocolResult<Vec<u8>> {
    if data.len() > COMMAND_DATA_LEN {
        return Err(ProtocolError::TooMuchData {
            max: COMMAND_DATA_LEN,
            actual: data.len(),
        });
    }
    Ok(framed(msg_type, CMD_BULB, key, sequence, wb, zone, data))
}

/// Build a link (`link == true`) or unlink frame for a zone.
pub fn link_frame(key: &SessionKey, sequence: u16, wb: u8, zone: u8, link: bool) -> Vec<u8> {
    let msg_type = if link { MSG_LINK } else { MSG_UNLINK };
    framed(msg_type, CMD_BULB, key, sequence, wb, zone, &[])
}

/// Build the registration frame that completes the handshake.
pub fn registration_frame(key: &SessionKey, sequence: u16) -> Vec<u8> {
    framed(MSG_COMMAND, CMD_REGISTER, key, sequence, 0, 0, &[])
}

/// Build the search frame used to find the bridge.
pub fn search_frame(client_session_id: [u8; 2], bridge: &BridgeId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(15);
    put_header(&mut buf, MSG_SEARCH, 15);
    buf.put_u8(0x02);
    buf.put_slice(&client_session_id);
    buf.put_u8(0x01);
    buf.put_slice(bridge.mac());
    buf
}

/// Build the establish-session frame that asks the bridge for a session id.
pub fn establish_session_frame(client_session_id: [u8; 2]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(27);
    put_header(&mut buf, MSG_ESTABLISH_SESSION, 27);
    buf.put_slice(&ESTABLISH_SESSION_MAGIC);
    buf.put_slice(&client_session_id);
    buf.put_slice(&[0x00, 0x00, 0x1E]);
    buf
}

/// Build the pre-registration frame.
pub fn pre_registration_frame(session_id: [u8; 2]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    put_header(&mut buf, MSG_PRE_REGISTRATION, 8);
    buf.put_slice(&session_id);
    buf.put_u8(0);
    buf
}

/// Build the keep-alive frame.
pub fn keep_alive_frame(session_id: [u8; 2]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    put_header(&mut buf, MSG_KEEP_ALIVE, 7);
    buf.put_slice(&session_id);
    buf
}
