use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Sink, Stream};

use crate::error::{Result, TransportError};

/// Outgoing half of a [`Socket`].
pub type MessageSink = Pin<Box<dyn Sink<Outbound, Error = TransportError> + Send>>;

/// Incoming half of a [`Socket`].
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Inbound>> + Send>>;

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One complete text (or UTF-8 binary) message.
    Message(Bytes),
    /// The peer initiated a close, with its close code if it sent one.
    Close(Option<u16>),
}

/// A message queued for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One complete text message.
    Message(Bytes),
    /// Begin the closing handshake.
    Close { code: u16, reason: String },
}

impl Outbound {
    /// What the other end of an in-process link observes for this message.
    pub(crate) fn into_inbound(self) -> Inbound {
        match self {
            Outbound::Message(bytes) => Inbound::Message(bytes),
            Outbound::Close { code, .. } => Inbound::Close(Some(code)),
        }
    }
}

/// A connected, message-oriented duplex.
///
/// This is the fundamental I/O type returned by transport operations. A
/// socket may be a direct WebSocket, or a proxy that forwards messages across
/// a privilege boundary; consumers only see the sink/stream pair.
pub struct Socket {
    pub sink: MessageSink,
    pub stream: MessageStream,
    kind: &'static str,
    peer: Option<String>,
}

impl Socket {
    /// Assemble a socket from its halves.
    pub fn new(sink: MessageSink, stream: MessageStream, kind: &'static str) -> Self {
        Self {
            sink,
            stream,
            kind,
            peer: None,
        }
    }

    /// Attach a human-readable peer label (remote address, proxy route).
    pub fn with_peer(mut self, peer: Option<String>) -> Self {
        self.peer = peer;
        self
    }

    /// Transport family, e.g. `websocket` or `proxy`.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Peer label, if known.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Split into sink and stream halves.
    pub fn into_parts(self) -> (MessageSink, MessageStream) {
        (self.sink, self.stream)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Strategy for opening a transport to an address.
///
/// A dialer is chosen once when a client is constructed; the client's
/// reconnect logic never depends on which one it got.
pub trait Dialer: Send + Sync + 'static {
    /// Open a new socket to `address`.
    fn dial(&self, address: &str) -> impl Future<Output = Result<Socket>> + Send;
}
