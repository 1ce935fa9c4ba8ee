use ctxrelay_envelope::{Envelope, MessageKind, HANDSHAKE, LEGACY_HANDSHAKE};

use crate::error::{PeerError, Result};

const MAX_SOURCE_LEN: usize = 128;
const MAX_VERSION_LEN: usize = 16;

/// Source tag the browser extension announces.
pub const DEFAULT_SOURCE: &str = "react-context-devtool-extension";
/// Protocol version spoken by current extension builds.
pub const DEFAULT_PROTOCOL_VERSION: &str = "4.4";
/// Status a relay reports in its handshake reply.
pub const STATUS_CONNECTED: &str = "connected";
/// Human-readable greeting in the relay's handshake reply.
pub const DEFAULT_GREETING: &str = "Connected to React Context DevTool";

/// What a client announces when its transport opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Sender identity, e.g. `react-context-devtool-extension`.
    pub source: String,
    /// `<major>.<minor>` protocol version.
    pub protocol_version: String,
    /// Announce with `react-context-devtool-handshake` for relays that only
    /// recognise the older tag.
    pub legacy: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            legacy: false,
        }
    }
}

impl HandshakeConfig {
    pub fn validate(&self) -> Result<()> {
        validate_source(&self.source)?;
        validate_version(&self.protocol_version)
    }

    /// The envelope sent as the first message of every connection.
    pub fn envelope(&self) -> Envelope {
        let tag = if self.legacy { LEGACY_HANDSHAKE } else { HANDSHAKE };
        Envelope::new(tag)
            .with_source(self.source.clone())
            .with_version(self.protocol_version.clone())
    }
}

/// Handshake as seen by the relay. Both fields are optional; peers in the
/// wild omit either.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub source: Option<String>,
    pub version: Option<String>,
}

impl HandshakeRequest {
    /// Returns `None` unless `envelope` is a handshake under either tag.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if envelope.kind() != MessageKind::Handshake {
            return None;
        }
        Some(Self {
            source: envelope.str_field("source").map(str::to_string),
            version: envelope.str_field("version").map(str::to_string),
        })
    }

    /// Whether the announced version shares our major version. Peers that
    /// announce nothing, or something unparseable, are let through.
    pub fn is_compatible_with(&self, local_version: &str) -> bool {
        match self.version.as_deref() {
            Some(version) => is_version_compatible(version, local_version).unwrap_or(true),
            None => true,
        }
    }
}

/// The relay's reply to any handshake.
pub fn handshake_reply(greeting: &str) -> Envelope {
    Envelope::handshake_response(STATUS_CONNECTED, greeting)
}

/// Handshake reply as seen by a client. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: String,
    pub message: Option<String>,
}

impl HandshakeResponse {
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if envelope.kind() != MessageKind::HandshakeResponse {
            return None;
        }
        Some(Self {
            status: envelope.str_field("status").unwrap_or("unknown").to_string(),
            message: envelope.str_field("message").map(str::to_string),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.status == STATUS_CONNECTED
    }
}

fn validate_source(source: &str) -> Result<()> {
    if source.is_empty() || source.len() > MAX_SOURCE_LEN {
        return Err(PeerError::InvalidConfig(format!(
            "invalid handshake source length: {}",
            source.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::InvalidConfig(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

/// Peers are compatible when their major versions agree.
pub fn is_version_compatible(peer_version: &str, local_version: &str) -> Result<bool> {
    let (peer_major, _) = parse_version(peer_version)?;
    let (local_major, _) = parse_version(local_version)?;
    Ok(peer_major == local_major)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let mut parts = version.split('.');

    let major = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': missing major"))
    })?;
    let minor = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': missing minor"))
    })?;

    if parts.next().is_some() {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid version '{version}': expected '<major>.<minor>'"
        )));
    }

    let major = major.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': non-numeric major"))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{version}': non-numeric minor"))
    })?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use ctxrelay_envelope::HANDSHAKE_RESPONSE;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_handshake_envelope() {
        let env = HandshakeConfig::default().envelope();
        assert_eq!(env.msg_type, HANDSHAKE);
        assert_eq!(env.source.as_deref(), Some(DEFAULT_SOURCE));
        assert_eq!(env.version.as_deref(), Some("4.4"));
    }

    #[test]
    fn legacy_handshake_uses_old_tag() {
        let config = HandshakeConfig {
            legacy: true,
            ..HandshakeConfig::default()
        };
        assert_eq!(config.envelope().msg_type, LEGACY_HANDSHAKE);
    }

    #[test]
    fn config_validation() {
        assert!(HandshakeConfig::default().validate().is_ok());

        let empty_source = HandshakeConfig {
            source: String::new(),
            ..HandshakeConfig::default()
        };
        assert!(matches!(
            empty_source.validate(),
            Err(PeerError::InvalidConfig(_))
        ));

        for bad in ["4", "4.4.1", "four.4", "4.x"] {
            let config = HandshakeConfig {
                protocol_version: bad.to_string(),
                ..HandshakeConfig::default()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn request_reads_either_tag() {
        let modern = Envelope::handshake("app", "4.4");
        let legacy = Envelope::new(LEGACY_HANDSHAKE).with_source("ext");

        let req = HandshakeRequest::from_envelope(&modern).unwrap();
        assert_eq!(req.source.as_deref(), Some("app"));
        assert_eq!(req.version.as_deref(), Some("4.4"));

        let req = HandshakeRequest::from_envelope(&legacy).unwrap();
        assert_eq!(req.source.as_deref(), Some("ext"));
        assert_eq!(req.version, None);

        assert!(HandshakeRequest::from_envelope(&Envelope::new("context-data")).is_none());
    }

    #[test]
    fn request_reads_fields_nested_in_payload() {
        let env = Envelope::new(HANDSHAKE).with_payload(json!({"source": "page", "version": "4.1"}));
        let req = HandshakeRequest::from_envelope(&env).unwrap();
        assert_eq!(req.source.as_deref(), Some("page"));
        assert_eq!(req.version.as_deref(), Some("4.1"));
    }

    #[test]
    fn compatibility_is_by_major_version() {
        let req = |v: Option<&str>| HandshakeRequest {
            source: None,
            version: v.map(str::to_string),
        };
        assert!(req(Some("4.0")).is_compatible_with("4.4"));
        assert!(req(Some("4.9")).is_compatible_with("4.4"));
        assert!(!req(Some("3.9")).is_compatible_with("4.4"));
        assert!(req(None).is_compatible_with("4.4"));
        assert!(req(Some("garbage")).is_compatible_with("4.4"));
    }

    #[test]
    fn reply_is_connected_with_greeting() {
        let reply = handshake_reply(DEFAULT_GREETING);
        assert_eq!(reply.msg_type, HANDSHAKE_RESPONSE);

        let parsed = HandshakeResponse::from_envelope(&reply).unwrap();
        assert!(parsed.is_connected());
        assert_eq!(parsed.message.as_deref(), Some(DEFAULT_GREETING));
    }

    #[test]
    fn response_without_status_is_unknown() {
        let parsed = HandshakeResponse::from_envelope(&Envelope::new(HANDSHAKE_RESPONSE)).unwrap();
        assert_eq!(parsed.status, "unknown");
        assert!(!parsed.is_connected());
    }
}
