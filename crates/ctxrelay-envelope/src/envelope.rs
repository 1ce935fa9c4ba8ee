use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::kind::{MessageKind, ACTION_DISPATCH, CONTEXT_DATA, HANDSHAKE, HANDSHAKE_RESPONSE};

/// A typed protocol message.
///
/// Only `type` is required. Top-level keys other than the four named fields
/// are preserved in [`Envelope::extra`] so that relaying never loses data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with only a `type` tag.
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: None,
            source: None,
            version: None,
            extra: Map::new(),
        }
    }

    /// Handshake request announcing the sender and its protocol version.
    pub fn handshake(source: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(HANDSHAKE)
            .with_source(source)
            .with_version(version)
    }

    /// Handshake reply. `status` and `message` travel as top-level keys, the
    /// shape existing extension builds read.
    pub fn handshake_response(status: &str, message: &str) -> Self {
        Self::new(HANDSHAKE_RESPONSE)
            .with_extra("status", Value::String(status.to_string()))
            .with_extra("message", Value::String(message.to_string()))
    }

    /// Context/useReducer snapshot.
    pub fn context_data(payload: Value) -> Self {
        Self::new(CONTEXT_DATA).with_payload(payload)
    }

    /// Action dispatch addressed to the reducer identified by `debug_id`.
    pub fn action_dispatch(debug_id: impl Into<String>, data: Value) -> Self {
        Self::new(ACTION_DISPATCH).with_payload(json!({
            "debugId": debug_id.into(),
            "data": data,
        }))
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach an arbitrary top-level key.
    ///
    /// Keys that collide with the named fields are ignored on encode.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !matches!(key.as_str(), "type" | "payload" | "source" | "version") {
            self.extra.insert(key, value);
        }
        self
    }

    /// Routing class of this envelope.
    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(&self.msg_type)
    }

    /// Look up a string field, first at the top level, then inside `payload`.
    ///
    /// Peers disagree on where handshake metadata lives; both placements are read.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        let top = match key {
            "source" => self.source.as_deref(),
            "version" => self.version.as_deref(),
            _ => self.extra.get(key).and_then(Value::as_str),
        };
        top.or_else(|| {
            self.payload
                .as_ref()
                .and_then(|payload| payload.get(key))
                .and_then(Value::as_str)
        })
    }
}
