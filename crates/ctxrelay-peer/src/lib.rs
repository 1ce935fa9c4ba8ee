//! Connections and reconnecting clients for ctxrelay.
//!
//! Provides the session layer on top of `ctxrelay-transport` and
//! `ctxrelay-envelope`:
//! - [`Connection`]: one socket behind a uniform send/close/event surface
//! - [`ReconnectingClient`]: dial-out with a handshake and bounded retry
//! - handshake metadata and version checks
//! - retry bookkeeping with constant or exponential backoff

pub mod backoff;
pub mod client;
pub mod connection;
pub mod error;
pub mod handshake;

pub use backoff::{Backoff, ReconnectState};
pub use client::{
    ClientConfig, ClientEvent, ClientEvents, ClientState, ClientStatus, ReconnectingClient,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionId, ConnectionState, EventKind,
    EventSender, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_POLICY,
    DEFAULT_OUTBOUND_CAPACITY,
};
pub use error::{PeerError, Result};
pub use handshake::{
    handshake_reply, is_version_compatible, HandshakeConfig, HandshakeRequest, HandshakeResponse,
    DEFAULT_GREETING, DEFAULT_PROTOCOL_VERSION, DEFAULT_SOURCE, STATUS_CONNECTED,
};
