//! Session configuration.
//!
//! A [`SessionConfig`] describes one bridge: its identifier, where to reach
//! it and how commands are paced. It can be built in code or loaded from a
//! YAML file:
//!
//! ```yaml
//! bridge_id: "ACCF23F57AD4"
//! host: 192.168.1.40
//! password: [0, 0]
//! keep_alive_ms: 5000
//! repeat_commands: 1
//! delay_ms: 100
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use milight_protocol::{BridgeId, DEFAULT_PORT, SESSION_TIMEOUT_MS};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Smallest accepted keep-alive interval (milliseconds).
pub const MIN_KEEP_ALIVE_MS: u64 = 100;

/// Largest accepted repeat count for repeatable commands.
pub const MAX_REPEAT_COMMANDS: u8 = 5;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_keep_alive_ms() -> u64 {
    5000
}

fn default_repeat_commands() -> u8 {
    1
}

fn default_delay_ms() -> u64 {
    100
}

/// Configuration of a bridge session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bridge MAC as 12 hex characters.
    pub bridge_id: String,
    /// Bridge address. Broadcast when unknown.
    #[serde(default)]
    pub host: Option<IpAddr>,
    /// Bridge UDP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bridge password bytes.
    #[serde(default)]
    pub password: [u8; 2],
    /// Interval between keep-alive requests (milliseconds).
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// How often a repeatable command is sent back to back.
    #[serde(default = "default_repeat_commands")]
    pub repeat_commands: u8,
    /// Pause after each queued command (milliseconds).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Fixed client session id. Chosen at random when absent.
    #[serde(default)]
    pub client_session_id: Option<[u8; 2]>,
}

impl SessionConfig {
    /// Create a config for the given bridge id with default settings.
    pub fn new(bridge_id: impl Into<String>) -> Self {
        SessionConfig {
            bridge_id: bridge_id.into(),
            host: None,
            port: default_port(),
            password: [0, 0],
            keep_alive_ms: default_keep_alive_ms(),
            repeat_commands: default_repeat_commands(),
            delay_ms: default_delay_ms(),
            client_session_id: None,
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> SessionResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Set the bridge address.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Set the bridge port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the password bytes.
    pub fn with_password(mut self, password: [u8; 2]) -> Self {
        self.password = password;
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive_ms(mut self, keep_alive_ms: u64) -> Self {
        self.keep_alive_ms = keep_alive_ms;
        self
    }

    /// Set the repeat count of repeatable commands.
    pub fn with_repeat_commands(mut self, repeat_commands: u8) -> Self {
        self.repeat_commands = repeat_commands;
        self
    }

    /// Set the pause after each queued command.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Use a fixed client session id.
    pub fn with_client_session_id(mut self, id: [u8; 2]) -> Self {
        self.client_session_id = Some(id);
        self
    }

    /// Check all values and return the parsed bridge id.
    ///
    /// The keep-alive interval has to be shorter than the session timeout,
    /// otherwise the session would expire between two keep-alives.
    pub fn validate(&self) -> SessionResult<BridgeId> {
        let bridge_id = BridgeId::parse(&self.bridge_id)?;

        if self.keep_alive_ms < MIN_KEEP_ALIVE_MS || self.keep_alive_ms >= SESSION_TIMEOUT_MS {
            return Err(SessionError::InvalidKeepAlive {
                actual: self.keep_alive_ms,
                min: MIN_KEEP_ALIVE_MS,
                max: SESSION_TIMEOUT_MS,
            });
        }
        if self.repeat_commands == 0 || self.repeat_commands > MAX_REPEAT_COMMANDS {
            return Err(SessionError::InvalidRepeatCount(self.repeat_commands));
        }

        Ok(bridge_id)
    }

    /// Keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Pause after each queued command.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Configured bridge address, or the broadcast address when unknown.
    pub fn destination(&self) -> SocketAddr {
        let ip = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::BROADCAST));
        SocketAddr::new(ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new("ACCF23F57AD4");
        assert_eq!(config.port, 5987);
        assert_eq!(config.keep_alive(), Duration::from_millis(5000));
        assert_eq!(
            config.destination(),
            "255.255.255.255:5987".parse::<SocketAddr>().unwrap()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
bridge_id: "ac:cf:23:f5:7a:d4"
host: 192.168.1.40
password: [1, 2]
keep_alive_ms: 1000
"#;
        let config = SessionConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.password, [1, 2]);
        assert_eq!(config.repeat_commands, 1);
        assert_eq!(config.delay_ms, 100);
        assert_eq!(
            config.destination(),
            "192.168.1.40:5987".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.validate().unwrap().to_string(), "ACCF23F57AD4");
    }

    #[test]
    fn test_yaml_requires_bridge_id() {
        assert!(matches!(
            SessionConfig::from_yaml_str("port: 5987"),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_validate_keep_alive() {
        let too_short = SessionConfig::new("ACCF23F57AD4").with_keep_alive_ms(50);
        assert!(matches!(
            too_short.validate(),
            Err(SessionError::InvalidKeepAlive { actual: 50, .. })
        ));

        let too_long = SessionConfig::new("ACCF23F57AD4").with_keep_alive_ms(10_000);
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_validate_bridge_id_and_repeat() {
        assert!(matches!(
            SessionConfig::new("nope").validate(),
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(
            SessionConfig::new("ACCF23F57AD4")
                .with_repeat_commands(0)
                .validate(),
            Err(SessionError::InvalidRepeatCount(0))
        ));
    }
}
