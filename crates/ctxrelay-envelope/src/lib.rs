//! Typed JSON envelopes for the ctxrelay devtools protocol.
//!
//! Every message on the wire is one JSON object with a string `type` tag and
//! optional `payload`, `source` and `version` fields:
//!
//! ```text
//! {"type":"context-data","source":"react-app","payload":{ ... }}
//! ```
//!
//! Decoding returns a typed error instead of failing the connection, so a
//! relay can log and drop a malformed message and keep serving the peer.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod kind;

pub use codec::{decode, decode_with, encode, DecodeConfig, DEFAULT_MAX_MESSAGE};
pub use envelope::Envelope;
pub use error::{DecodeError, Result};
pub use kind::{
    MessageKind, ACTION_DISPATCH, APP_DATA, CONTEXT_DATA, HANDSHAKE, HANDSHAKE_RESPONSE,
    LEGACY_ACTION_DISPATCH, LEGACY_CONTEXT_DATA, LEGACY_HANDSHAKE, RELAYED_ACTION_DISPATCH,
    RELAYED_CONTEXT_DATA,
};
