use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ctxrelay_envelope::{decode_with, encode, DecodeConfig, DecodeError, Envelope};
use ctxrelay_transport::{Inbound, MessageSink, MessageStream, Outbound, Socket};
use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Normal closure; peers must not reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (shutdown, abort).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Peer closed without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Transport dropped without a closing handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Peer violated relay policy (e.g. handshake timeout).
pub const CLOSE_POLICY: u16 = 1008;

/// Upper bound on how long the final close frame may take to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Opaque connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Configuration for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound queue depth. Sends beyond this are dropped with a warning.
    pub outbound_capacity: usize,
    /// Inbound decoding limits.
    pub decode: DecodeConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            decode: DecodeConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.outbound_capacity == 0 {
            return Err(crate::PeerError::InvalidConfig(
                "outbound_capacity must be greater than zero".to_string(),
            ));
        }
        if self.decode.max_message_size == 0 {
            return Err(crate::PeerError::InvalidConfig(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event surfaced to the owner of a connection.
#[derive(Debug)]
pub struct ConnectionEvent {
    pub id: ConnectionId,
    pub kind: EventKind,
}

#[derive(Debug)]
pub enum EventKind {
    /// The driver is running and the socket is usable.
    Open,
    /// A decoded envelope plus the exact bytes it arrived as.
    Message { envelope: Envelope, raw: Bytes },
    /// An inbound message failed to decode. The connection stays open.
    DecodeError(DecodeError),
    /// Transport failure. A `Closed` event follows.
    Error(String),
    /// Terminal event, delivered exactly once.
    Closed { code: u16 },
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

struct Shared {
    state: AtomicU8,
    opened_at: Instant,
    last_activity_ms: AtomicU64,
    dropped: AtomicU64,
    /// Close code asked for by the owner when the queue had no room for it. 0 when unset.
    requested_close: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            opened_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            requested_close: AtomicU32::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, next: ConnectionState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    fn touch(&self) {
        let now = self.opened_at.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    fn requested_close(&self) -> Option<u16> {
        match self.requested_close.load(Ordering::Acquire) {
            0 => None,
            code => u16::try_from(code).ok(),
        }
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }
}

/// One transport socket with a uniform send/close/event surface.
///
/// A single driver task owns the socket. The handle talks to it through a
/// bounded outbound queue; the driver reports back through the owner's event
/// channel. Dropping the handle performs a normal close.
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    close_requested: AtomicBool,
    kind: &'static str,
    peer: Option<String>,
}

impl Connection {
    /// Start driving `socket`. Must be called inside a tokio runtime.
    pub fn spawn(
        id: ConnectionId,
        socket: Socket,
        events: EventSender,
        config: &ConnectionConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let shared = Arc::new(Shared::new());
        let cancel = CancellationToken::new();
        let kind = socket.kind();
        let peer = socket.peer().map(str::to_string);
        let (sink, stream) = socket.into_parts();

        let driver = Driver {
            id,
            sink,
            stream,
            outbound: rx,
            events,
            shared: shared.clone(),
            cancel: cancel.clone(),
            decode: config.decode.clone(),
        };
        tokio::spawn(driver.run());

        Self {
            id,
            outbound: tx,
            shared,
            cancel,
            close_requested: AtomicBool::new(false),
            kind,
            peer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Transport family of the underlying socket.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Remote address or proxy route.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Time since the last message in either direction.
    pub fn idle_for(&self) -> Duration {
        self.shared.idle_for()
    }

    /// Messages dropped because the connection was closing or its queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Encode and queue an envelope.
    pub fn send(&self, envelope: &Envelope) -> bool {
        self.send_raw(encode(envelope))
    }

    /// Queue pre-encoded bytes.
    ///
    /// Returns `false` and logs a warning instead of failing when the
    /// connection is closing or backed up; fan-out loops rely on this.
    pub fn send_raw(&self, bytes: Bytes) -> bool {
        if self.close_requested.load(Ordering::Acquire)
            || self.state() >= ConnectionState::Closing
        {
            self.note_dropped("connection closed");
            return false;
        }
        match self.outbound.try_send(Outbound::Message(bytes)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.note_dropped("outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.note_dropped("connection closed");
                false
            }
        }
    }

    /// Start the closing handshake. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.state() >= ConnectionState::Closing {
            return;
        }
        self.shared.advance(ConnectionState::Closing);
        let close = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if let Err(TrySendError::Full(_)) = self.outbound.try_send(close) {
            // Queued messages are abandoned; the driver still sends this code.
            self.shared
                .requested_close
                .store(u32::from(code), Ordering::Release);
            self.cancel.cancel();
        }
    }

    /// Tear the connection down without waiting for queued messages.
    pub fn abort(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    fn note_dropped(&self, reason: &'static str) {
        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(conn = %self.id, reason, dropped, "dropping outbound message");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .finish()
    }
}

struct Driver {
    id: ConnectionId,
    sink: MessageSink,
    stream: MessageStream,
    outbound: mpsc::Receiver<Outbound>,
    events: EventSender,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    decode: DecodeConfig,
}

impl Driver {
    async fn run(mut self) {
        self.shared.advance(ConnectionState::Open);
        self.shared.touch();
        self.emit(EventKind::Open);

        let code = self.pump().await;

        self.shared.advance(ConnectionState::Closing);
        self.outbound.close();
        let _ = tokio::time::timeout(CLOSE_GRACE, self.sink.close()).await;
        self.shared.advance(ConnectionState::Closed);
        debug!(conn = %self.id, code, "connection closed");
        self.emit(EventKind::Closed { code });
    }

    async fn pump(&mut self) -> u16 {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return match self.shared.requested_close() {
                        Some(code) => {
                            self.send_close(code, String::new()).await;
                            code
                        }
                        None => CLOSE_GOING_AWAY,
                    };
                }
                out = self.outbound.recv() => match out {
                    Some(Outbound::Message(bytes)) => {
                        if let Err(err) = self.sink.send(Outbound::Message(bytes)).await {
                            self.emit(EventKind::Error(err.to_string()));
                            return CLOSE_ABNORMAL;
                        }
                        self.shared.touch();
                    }
                    Some(Outbound::Close { code, reason }) => {
                        self.send_close(code, reason).await;
                        return code;
                    }
                    None => {
                        self.send_close(CLOSE_NORMAL, String::new()).await;
                        return CLOSE_NORMAL;
                    }
                },
                inbound = self.stream.next() => match inbound {
                    Some(Ok(Inbound::Message(bytes))) => {
                        self.shared.touch();
                        self.dispatch(bytes);
                    }
                    Some(Ok(Inbound::Close(code))) => {
                        self.shared.advance(ConnectionState::Closing);
                        return code.unwrap_or(CLOSE_NO_STATUS);
                    }
                    Some(Err(err)) => {
                        self.emit(EventKind::Error(err.to_string()));
                        return CLOSE_ABNORMAL;
                    }
                    None => return CLOSE_ABNORMAL,
                },
            }
        }
    }

    async fn send_close(&mut self, code: u16, reason: String) {
        self.shared.advance(ConnectionState::Closing);
        let close = Outbound::Close { code, reason };
        let _ = tokio::time::timeout(CLOSE_GRACE, self.sink.send(close)).await;
    }

    fn dispatch(&self, raw: Bytes) {
        match decode_with(&raw, &self.decode) {
            Ok(envelope) => {
                debug!(conn = %self.id, msg_type = %envelope.msg_type, size = raw.len(), "message received");
                self.emit(EventKind::Message { envelope, raw });
            }
            Err(err) => {
                warn!(conn = %self.id, error = %err, size = raw.len(), "dropping undecodable message");
                self.emit(EventKind::DecodeError(err));
            }
        }
    }

    fn emit(&self, kind: EventKind) {
        let _ = self.events.send(ConnectionEvent { id: self.id, kind });
    }
}
