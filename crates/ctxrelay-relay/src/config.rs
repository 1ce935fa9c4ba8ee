use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ctxrelay_peer::{ConnectionConfig, DEFAULT_GREETING, DEFAULT_PROTOCOL_VERSION};

use crate::error::{RelayError, Result};

/// Port the devtools UI listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8097;
/// Lowest port a relay may be started on.
pub const MIN_PORT: u16 = 1024;
/// Buffered relay events per subscriber before the slowest one lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
/// Longest a client may take to finish the WebSocket upgrade.
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Relay`](crate::Relay).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interface to listen on. Loopback by default; the relay has no auth.
    pub host: IpAddr,
    /// Drop non-handshake traffic from peers that have not announced themselves.
    pub require_handshake: bool,
    /// Close peers that have not sent a handshake within this window.
    pub handshake_timeout: Option<Duration>,
    /// Deadline for the HTTP upgrade of an accepted socket.
    pub upgrade_timeout: Duration,
    /// Text of the `message` field in handshake replies.
    pub greeting: String,
    /// Protocol version peers are checked against.
    pub protocol_version: String,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
    /// Capacity of the relay event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            require_handshake: false,
            handshake_timeout: None,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            greeting: DEFAULT_GREETING.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            connection: ConnectionConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        self.connection
            .validate()
            .map_err(|err| RelayError::Config(err.to_string()))?;
        if self.event_capacity == 0 {
            return Err(RelayError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.upgrade_timeout.is_zero() {
            return Err(RelayError::Config(
                "upgrade_timeout must be greater than zero".to_string(),
            ));
        }
        if self.handshake_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RelayError::Config(
                "handshake_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject ports outside 1024-65535.
pub fn validate_port(port: u16) -> Result<u16> {
    if port < MIN_PORT {
        return Err(RelayError::Config(format!(
            "port {port} is outside the allowed range {MIN_PORT}-65535"
        )));
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.host.is_loopback());
        assert!(!config.require_handshake);
        assert!(config.handshake_timeout.is_none());
    }

    #[test]
    fn port_range() {
        assert!(validate_port(80).is_err());
        assert!(validate_port(1023).is_err());
        assert_eq!(validate_port(1024).unwrap(), 1024);
        assert_eq!(validate_port(DEFAULT_PORT).unwrap(), 8097);
        assert_eq!(validate_port(u16::MAX).unwrap(), 65535);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = RelayConfig {
            event_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let config = RelayConfig {
            handshake_timeout: Some(Duration::ZERO),
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = RelayConfig::default();
        config.connection.outbound_capacity = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }
}
