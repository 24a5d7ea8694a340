//! Datagrams sent by the bridge.

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// A classified datagram received from the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    /// Unsolicited notice (`0x13`).
    Notice {
        /// MAC of the sending bridge.
        mac: [u8; 6],
    },

    /// Answer to a search (`0x18`).
    SearchResponse {
        /// MAC of the answering bridge.
        mac: [u8; 6],
    },

    /// Session id assigned by the bridge (`0x28`).
    SessionId {
        /// MAC of the bridge.
        mac: [u8; 6],
        /// The new session id.
        session_id: [u8; 2],
    },

    /// Registration accepted (`0x80`).
    RegistrationConfirmed {
        /// MAC of the bridge.
        mac: [u8; 6],
    },

    /// Delivery confirmation of one command (`0x88`).
    CommandAck {
        /// Sequence number of the confirmed command.
        sequence: u16,
        /// Whether the bridge reported success.
        ok: bool,
    },

    /// Answer to a keep-alive (`0xD8`).
    KeepAlive {
        /// MAC of the bridge.
        mac: [u8; 6],
    },
}

fn mac_at(buf: &[u8], offset: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[offset..offset + 6]);
    mac
}

fn require_len(buf: &[u8], expected: usize) -> ProtocolResult<()> {
    if buf.len() < expected {
        return Err(ProtocolError::FrameTooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

impl BridgeMessage {
    /// Classify a datagram by its leading type byte.
    ///
    /// The three bytes after the type must be zero and the length byte must
    /// match the number of bytes that follow the header.
    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        require_len(buf, HEADER_LEN)?;

        let msg_type = buf[0];
        if buf[1..4] != [0, 0, 0] {
            return Err(ProtocolError::HeaderMismatch(msg_type));
        }
        let declared = buf[4] as usize;
        let actual = buf.len() - HEADER_LEN;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }

        match msg_type {
            RESP_NOTICE => {
                require_len(buf, 15)?;
                Ok(BridgeMessage::Notice { mac: mac_at(buf, 9) })
            }

            RESP_SEARCH => {
                require_len(buf, 12)?;
                Ok(BridgeMessage::SearchResponse { mac: mac_at(buf, 6) })
            }

            RESP_SESSION_ID => {
                require_len(buf, 21)?;
                Ok(BridgeMessage::SessionId {
                    mac: mac_at(buf, 7),
                    session_id: [buf[19], buf[20]],
                })
            }

            RESP_REGISTRATION => {
                require_len(buf, 11)?;
                Ok(BridgeMessage::RegistrationConfirmed { mac: mac_at(buf, 5) })
            }

            RESP_COMMAND_ACK => {
                require_len(buf, 8)?;
                Ok(BridgeMessage::CommandAck {
                    sequence: u16::from_le_bytes([buf[6], buf[7]]),
                    ok: buf[5] == 0,
                })
            }

            RESP_KEEP_ALIVE => {
                require_len(buf, 11)?;
                Ok(BridgeMessage::KeepAlive { mac: mac_at(buf, 5) })
            }

            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// MAC carried by the message, if any.
    pub fn mac(&self) -> Option<&[u8; 6]> {
        match self {
            BridgeMessage::Notice { mac }
            | BridgeMessage::SearchResponse { mac }
            | BridgeMessage::SessionId { mac, .. }
            | BridgeMessage::RegistrationConfirmed { mac }
            | BridgeMessage::KeepAlive { mac } => Some(mac),
            BridgeMessage::CommandAck { .. } => None,
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeMessage::Notice { .. } => "notice",
            BridgeMessage::SearchResponse { .. } => "search response",
            BridgeMessage::SessionId { .. } => "session id",
            BridgeMessage::RegistrationConfirmed { .. } => "registration confirmation",
            BridgeMessage::CommandAck { .. } => "command ack",
            BridgeMessage::KeepAlive { .. } => "keep-alive",
        }
    }
}
