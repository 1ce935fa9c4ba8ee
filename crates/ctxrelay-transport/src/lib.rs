//! Message-oriented transport abstraction.
//!
//! Provides a unified interface over the ways a devtools peer can be reached:
//! - WebSocket over TCP (direct)
//! - In-process channel pairs (proxied through a host-messaging bridge)
//!
//! This is the lowest layer of ctxrelay. Everything else builds on the
//! [`Socket`] type and the [`Dialer`] strategy defined here.

pub mod error;
pub mod proxy;
pub mod traits;
pub mod ws;

pub use error::{Result, TransportError};
pub use proxy::{channel_pair, proxy_link, ProxyDialer, DEFAULT_PROXY_CAPACITY};
pub use traits::{Dialer, Inbound, MessageSink, MessageStream, Outbound, Socket};
pub use ws::{normalize_url, upgrade, websocket_socket, WsDialer, WsListener, DEFAULT_HOST};
