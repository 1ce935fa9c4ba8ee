//! Built-in message types.
//!
//! Each kind accepts the short wire name plus the legacy names still sent by
//! deployed extensions and standalone servers.

/// Handshake request (client → relay).
pub const HANDSHAKE: &str = "handshake";
/// Handshake request as sent by the browser extension.
pub const LEGACY_HANDSHAKE: &str = "react-context-devtool-handshake";

/// Handshake reply (relay → client).
pub const HANDSHAKE_RESPONSE: &str = "handshake-response";

/// Context/useReducer snapshot (producer → consumers).
pub const CONTEXT_DATA: &str = "context-data";
/// Snapshot as sent by the browser extension.
pub const LEGACY_CONTEXT_DATA: &str = "react-context-devtool-data";
/// Snapshot as re-broadcast by the legacy standalone server.
pub const RELAYED_CONTEXT_DATA: &str = "react-context-data";
/// Snapshot as sent by an instrumented app without the extension.
pub const APP_DATA: &str = "react-app-data";

/// Action dispatch (consumer → producers).
pub const ACTION_DISPATCH: &str = "action-dispatch";
/// Dispatch as sent by the browser extension.
pub const LEGACY_ACTION_DISPATCH: &str = "react-context-devtool-dispatch";
/// Dispatch as re-broadcast by the legacy standalone server.
pub const RELAYED_ACTION_DISPATCH: &str = "react-action-dispatch";

/// Routing class of an envelope `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Handshake,
    HandshakeResponse,
    ContextData,
    ActionDispatch,
    /// Any type not listed above. Relays forward these untouched.
    Other,
}

impl MessageKind {
    /// Classify a raw `type` tag.
    pub fn classify(msg_type: &str) -> Self {
        match msg_type {
            HANDSHAKE | LEGACY_HANDSHAKE => Self::Handshake,
            HANDSHAKE_RESPONSE => Self::HandshakeResponse,
            CONTEXT_DATA | LEGACY_CONTEXT_DATA | RELAYED_CONTEXT_DATA | APP_DATA => {
                Self::ContextData
            }
            ACTION_DISPATCH | LEGACY_ACTION_DISPATCH | RELAYED_ACTION_DISPATCH => {
                Self::ActionDispatch
            }
            _ => Self::Other,
        }
    }

    /// Human-readable name used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::HandshakeResponse => "HANDSHAKE_RESPONSE",
            Self::ContextData => "CONTEXT_DATA",
            Self::ActionDispatch => "ACTION_DISPATCH",
            Self::Other => "OTHER",
        }
    }

    /// Returns true for the connection-management kinds that a relay answers
    /// itself instead of forwarding.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_names_map_to_the_same_kind() {
        assert_eq!(MessageKind::classify(HANDSHAKE), MessageKind::Handshake);
        assert_eq!(
            MessageKind::classify(LEGACY_HANDSHAKE),
            MessageKind::Handshake
        );
        assert_eq!(
            MessageKind::classify(LEGACY_CONTEXT_DATA),
            MessageKind::ContextData
        );
        assert_eq!(MessageKind::classify(APP_DATA), MessageKind::ContextData);
        assert_eq!(
            MessageKind::classify(LEGACY_ACTION_DISPATCH),
            MessageKind::ActionDispatch
        );
    }

    #[test]
    fn unknown_types_are_other() {
        assert_eq!(MessageKind::classify("fiber-data"), MessageKind::Other);
        assert_eq!(MessageKind::classify(""), MessageKind::Other);
        assert!(!MessageKind::Other.is_control());
        assert!(MessageKind::Handshake.is_control());
    }
}
