//! Bridge identifier (the bridge's WiFi MAC address).

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, ProtocolResult};

/// Identifier of a bridge: the 6 bytes of its MAC address.
///
/// Parsed from 12 hex characters, optionally separated by `:` or `-`
/// (`ACCF23F57AD4`, `ac:cf:23:f5:7a:d4`). Displayed as 12 uppercase hex
/// characters without separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId([u8; 6]);

impl BridgeId {
    /// Create a bridge id from raw MAC bytes.
    pub const fn new(mac: [u8; 6]) -> Self {
        BridgeId(mac)
    }

    /// Get the MAC bytes.
    pub fn mac(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check whether the given slice carries this bridge's MAC.
    pub fn matches(&self, mac: &[u8]) -> bool {
        mac == self.0
    }

    /// Parse a bridge id string.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 {
            return Err(ProtocolError::InvalidBridgeId(s.to_string()));
        }

        let bytes = hex::decode(&digits).map_err(|_| ProtocolError::InvalidBridgeId(s.to_string()))?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes);
        Ok(BridgeId(mac))
    }
}

impl FromStr for BridgeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BridgeId::parse(s)
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let id: BridgeId = "AACCFF223344".parse().unwrap();
        assert_eq!(id.mac(), &[0xAA, 0xCC, 0xFF, 0x22, 0x33, 0x44]);
        assert_eq!(id.to_string(), "AACCFF223344");
    }

    #[test]
    fn test_parse_separators_and_case() {
        let a: BridgeId = "ac:cf:23:f5:7a:d4".parse().unwrap();
        let b: BridgeId = "AC-CF-23-F5-7A-D4".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ACCF23F57AD4");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            BridgeId::parse("ACCF23F57A"),
            Err(ProtocolError::InvalidBridgeId(_))
        ));
        assert!(BridgeId::parse("ACCF23F57AZZ").is_err());
        assert!(BridgeId::parse("").is_err());
    }

    #[test]
    fn test_matches() {
        let id = BridgeId::new([1, 2, 3, 4, 5, 6]);
        assert!(id.matches(&[1, 2, 3, 4, 5, 6]));
        assert!(!id.matches(&[1, 2, 3, 4, 5, 7]));
        assert!(!id.matches(&[1, 2, 3]));
    }
}
