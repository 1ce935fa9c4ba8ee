use bytes::Bytes;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::{DecodeError, Result};

/// Default maximum inbound message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Configuration for envelope decoding.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum message size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

/// Encode an envelope as a UTF-8 JSON document.
pub fn encode(envelope: &Envelope) -> Bytes {
    // A struct of strings and JSON values always serializes.
    let json = serde_json::to_vec(envelope).unwrap_or_else(|err| {
        tracing::error!(error = %err, msg_type = %envelope.msg_type, "envelope serialization failed");
        b"{}".to_vec()
    });
    Bytes::from(json)
}

/// Decode one message using the default configuration.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    decode_with(bytes, &DecodeConfig::default())
}

/// Decode one message.
///
/// The message must be a JSON object with a string `type`. Everything else
/// is optional; unrecognized keys are kept.
pub fn decode_with(bytes: &[u8], config: &DecodeConfig) -> Result<Envelope> {
    if bytes.len() > config.max_message_size {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: config.max_message_size,
        });
    }

    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::InvalidJson)?;
    let Value::Object(map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if !matches!(map.get("type"), Some(Value::String(_))) {
        return Err(DecodeError::MissingType);
    }

    serde_json::from_value(Value::Object(map)).map_err(DecodeError::InvalidField)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::kind::MessageKind;

    #[test]
    fn decode_minimal_envelope() {
        let env = decode(br#"{"type":"context-data"}"#).unwrap();
        assert_eq!(env.msg_type, "context-data");
        assert!(env.payload.is_none());
        assert!(env.source.is_none());
        assert_eq!(env.kind(), MessageKind::ContextData);
    }

    #[test]
    fn decode_keeps_unknown_fields() {
        let env = decode(br#"{"type":"handshake-response","status":"connected","message":"hi"}"#)
            .unwrap();
        assert_eq!(env.str_field("status"), Some("connected"));

        let reencoded: Value = serde_json::from_slice(&encode(&env)).unwrap();
        assert_eq!(
            reencoded,
            json!({"type":"handshake-response","status":"connected","message":"hi"})
        );
    }

    #[test]
    fn decode_rejects_non_json() {
        let err = decode(b"not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));

        let err = decode(&[0xFF, 0xFE, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            decode(b"[1,2,3]").unwrap_err(),
            DecodeError::NotAnObject
        ));
        assert!(matches!(
            decode(b"\"handshake\"").unwrap_err(),
            DecodeError::NotAnObject
        ));
    }

    #[test]
    fn decode_requires_string_type() {
        assert!(matches!(
            decode(br#"{"payload":{"x":1}}"#).unwrap_err(),
            DecodeError::MissingType
        ));
        assert!(matches!(
            decode(br#"{"type":42}"#).unwrap_err(),
            DecodeError::MissingType
        ));
        assert!(matches!(
            decode(br#"{"type":null}"#).unwrap_err(),
            DecodeError::MissingType
        ));
    }

    #[test]
    fn decode_rejects_mistyped_source() {
        let err = decode(br#"{"type":"handshake","source":7}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField(_)));
    }

    #[test]
    fn decode_enforces_size_limit() {
        let config = DecodeConfig {
            max_message_size: 16,
        };
        let err = decode_with(br#"{"type":"context-data","payload":{}}"#, &config).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { max: 16, .. }));
    }

    #[test]
    fn encode_produces_utf8_json() {
        let env = Envelope::context_data(json!({"user": "héllo"})).with_source("app");
        let bytes = encode(&env);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"type\":\"context-data\""));
        assert_eq!(decode(&bytes).unwrap(), env);
    }
}
