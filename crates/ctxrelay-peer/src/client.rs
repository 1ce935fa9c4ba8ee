//! Dial-out client that keeps a devtools session alive.
//!
//! The client is an actor: one task owns the current [`Connection`], the
//! in-flight dial and the retry timer. [`ReconnectingClient`] is a cheap
//! handle that talks to it over a command channel and reads its status from
//! a watch channel.

use std::future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ctxrelay_envelope::{DecodeError, Envelope};
use ctxrelay_transport::{Dialer, Socket, TransportError};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::backoff::{Backoff, ReconnectState};
use crate::connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionId, EventKind, CLOSE_NORMAL,
};
use crate::error::{PeerError, Result};
use crate::handshake::{HandshakeConfig, HandshakeResponse};

/// Retries after the first failed dial.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Wait before each retry under the default constant policy.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);
/// Upper bound on a single dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Events buffered for the owner before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

const COMMAND_CAPACITY: usize = 32;

/// Configuration for a [`ReconnectingClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Announcement sent first on every new connection.
    pub handshake: HandshakeConfig,
    /// Retries allowed after an unexpected close or failed dial.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// How the delay grows between retries.
    pub backoff: Backoff,
    /// A dial that takes longer than this counts as failed.
    pub connect_timeout: Duration,
    /// Settings for each connection the client opens.
    pub connection: ConnectionConfig,
    /// Depth of the [`ClientEvents`] queue. Events beyond it are dropped
    /// with a warning; [`ReconnectingClient::status`] stays accurate.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RECONNECT_DELAY,
            backoff: Backoff::Constant,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection: ConnectionConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        self.handshake.validate()?;
        self.backoff.validate()?;
        self.connection.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(PeerError::InvalidConfig(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PeerError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// Not connected and not trying to be.
    Idle,
    /// A dial is in flight.
    Connecting,
    /// Transport open and handshake sent.
    Open,
    /// Local disconnect in progress.
    Closing,
    /// Waiting for the retry timer.
    Reconnecting,
    /// Retry budget spent. Only a manual connect leaves this state.
    Failed,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::Connecting => "connecting",
            ClientState::Open => "open",
            ClientState::Closing => "closing",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Failed => "failed",
        }
    }
}

/// Snapshot of a client, published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub state: ClientState,
    pub address: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_delay_ms: u64,
    pub last_error: Option<String>,
}

/// What the client reports to its owner.
#[derive(Debug)]
pub enum ClientEvent {
    StateChanged(ClientState),
    /// The exact handshake envelope queued as the first message.
    HandshakeSent(Envelope),
    HandshakeResponse(HandshakeResponse),
    Message { envelope: Envelope, raw: Bytes },
    DecodeError(DecodeError),
    Error(String),
    Closed { code: u16 },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Emitted once when the retry budget runs out.
    Exhausted { attempts: u32 },
}

/// Bounded; an owner that stops reading loses new events, not memory.
pub type ClientEvents = mpsc::Receiver<ClientEvent>;

enum Command {
    Connect {
        address: String,
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a reconnecting client task. Dropping the handle shuts the
/// task down and closes any open connection normally.
pub struct ReconnectingClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ClientStatus>,
    dropped_events: Arc<AtomicU64>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ReconnectingClient {
    /// Start a client task using `dialer` to open transports.
    pub fn spawn<D: Dialer>(dialer: D, config: ClientConfig) -> Result<(Self, ClientEvents)> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let dropped_events = Arc::new(AtomicU64::new(0));
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let reconnect = ReconnectState::new(config.max_attempts, config.base_delay, config.backoff);
        let (status_tx, status_rx) = watch::channel(ClientStatus {
            state: ClientState::Idle,
            address: None,
            attempts: 0,
            max_attempts: config.max_attempts,
            next_delay_ms: config.base_delay.as_millis() as u64,
            last_error: None,
        });
        let cancel = CancellationToken::new();

        let actor = Actor {
            dialer: Arc::new(dialer),
            config,
            commands: commands_rx,
            events: events_tx,
            dropped_events: Arc::clone(&dropped_events),
            status: status_tx,
            cancel: cancel.clone(),
            conn_tx,
            conn_rx,
            state: ClientState::Idle,
            address: None,
            reconnect,
            last_error: None,
            connection: None,
            dial: None,
            retry: None,
            next_id: 0,
        };
        tokio::spawn(actor.run());

        let client = Self {
            commands: commands_tx,
            status: status_rx,
            dropped_events,
            _guard: cancel.clone().drop_guard(),
            cancel,
        };
        Ok((client, events_rx))
    }

    /// Dial `address`, replacing any existing connection, pending dial or
    /// retry. Resets the retry budget. Returns once the dial has started.
    pub async fn connect(&self, address: impl Into<String>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Connect {
            address: address.into(),
            ack,
        })
        .await?;
        done.await.map_err(|_| stopped())
    }

    /// Close with code 1000 and stop retrying.
    pub async fn disconnect(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Disconnect { ack }).await?;
        done.await.map_err(|_| stopped())
    }

    /// Forward an envelope to the current connection.
    ///
    /// Returns `Ok(false)` when there is no open connection; the message is
    /// dropped with a warning, never queued for a later connection.
    pub async fn send(&self, envelope: Envelope) -> Result<bool> {
        let (reply, sent) = oneshot::channel();
        self.command(Command::Send { envelope, reply }).await?;
        sent.await.map_err(|_| stopped())
    }

    /// Wait until the client is `Open`.
    ///
    /// Fails with [`PeerError::ReconnectExhausted`] once the client gives up,
    /// and with [`PeerError::Closed`] if it goes idle instead.
    pub async fn wait_open(&self) -> Result<()> {
        let mut status = self.status.clone();
        let (state, attempts) = {
            let current = status
                .wait_for(|s| {
                    matches!(
                        s.state,
                        ClientState::Open | ClientState::Failed | ClientState::Idle
                    )
                })
                .await
                .map_err(|_| stopped())?;
            (current.state, current.attempts)
        };
        match state {
            ClientState::Open => Ok(()),
            ClientState::Failed => Err(PeerError::ReconnectExhausted { attempts }),
            _ => Err(PeerError::Closed("client is idle".to_string())),
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Events lost because the [`ClientEvents`] queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Stop the client task. Equivalent to dropping the handle.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

fn stopped() -> PeerError {
    PeerError::Closed("client task has stopped".to_string())
}

type DialResult = std::result::Result<Socket, TransportError>;

struct Actor<D> {
    dialer: Arc<D>,
    config: ClientConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ClientEvent>,
    dropped_events: Arc<AtomicU64>,
    status: watch::Sender<ClientStatus>,
    cancel: CancellationToken,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    state: ClientState,
    address: Option<String>,
    reconnect: ReconnectState,
    last_error: Option<String>,
    connection: Option<Connection>,
    dial: Option<JoinHandle<DialResult>>,
    retry: Option<Pin<Box<Sleep>>>,
    next_id: u64,
}

impl<D: Dialer> Actor<D> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.conn_rx.recv() => self.handle_connection_event(event),
                joined = dial_finished(&mut self.dial) => {
                    self.dial = None;
                    self.handle_dial(joined);
                }
                () = retry_due(&mut self.retry) => {
                    self.retry = None;
                    self.start_dial();
                }
            }
        }
        self.teardown();
        debug!("reconnecting client stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { address, ack } => {
                self.teardown();
                info!(%address, "connecting");
                self.address = Some(address);
                self.reconnect.reset();
                self.last_error = None;
                self.start_dial();
                let _ = ack.send(());
            }
            Command::Disconnect { ack } => {
                if let Some(handle) = self.dial.take() {
                    handle.abort();
                }
                self.retry = None;
                self.reconnect.reset();
                match &self.connection {
                    Some(conn) => {
                        conn.close(CLOSE_NORMAL, "client disconnect");
                        self.set_state(ClientState::Closing);
                    }
                    None => self.set_state(ClientState::Idle),
                }
                let _ = ack.send(());
            }
            Command::Send { envelope, reply } => {
                let sent = match &self.connection {
                    Some(conn) if self.state == ClientState::Open => conn.send(&envelope),
                    _ => {
                        warn!(msg_type = %envelope.msg_type, state = self.state.as_str(), "dropping message: not connected");
                        false
                    }
                };
                let _ = reply.send(sent);
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if self.connection.as_ref().map(Connection::id) != Some(event.id) {
            trace!(conn = %event.id, "ignoring event from retired connection");
            return;
        }
        match event.kind {
            EventKind::Open => {}
            EventKind::Message { envelope, raw } => {
                match HandshakeResponse::from_envelope(&envelope) {
                    Some(response) => {
                        debug!(status = %response.status, "handshake acknowledged");
                        self.emit(ClientEvent::HandshakeResponse(response));
                    }
                    None => self.emit(ClientEvent::Message { envelope, raw }),
                }
            }
            EventKind::DecodeError(err) => self.emit(ClientEvent::DecodeError(err)),
            EventKind::Error(err) => {
                self.last_error = Some(err.clone());
                self.emit(ClientEvent::Error(err));
            }
            EventKind::Closed { code } => {
                self.connection = None;
                self.emit(ClientEvent::Closed { code });
                if self.state == ClientState::Closing {
                    self.set_state(ClientState::Idle);
                } else if code == CLOSE_NORMAL {
                    info!(conn = %event.id, "relay closed the session normally");
                    self.set_state(ClientState::Idle);
                } else {
                    warn!(conn = %event.id, code, "connection lost");
                    if self.last_error.is_none() {
                        self.last_error = Some(format!("connection closed with code {code}"));
                    }
                    self.schedule_retry();
                }
            }
        }
    }

    fn handle_dial(&mut self, joined: std::result::Result<DialResult, JoinError>) {
        match joined {
            Ok(Ok(socket)) => self.open(socket),
            Ok(Err(err)) => self.dial_failed(err.to_string()),
            Err(err) if err.is_cancelled() => {}
            Err(err) => self.dial_failed(err.to_string()),
        }
    }

    fn start_dial(&mut self) {
        let Some(address) = self.address.clone() else {
            self.set_state(ClientState::Idle);
            return;
        };
        let dialer = Arc::clone(&self.dialer);
        let timeout = self.config.connect_timeout;
        debug!(%address, attempt = self.reconnect.attempts, "dialing");
        self.dial = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, dialer.dial(&address)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            }
        }));
        self.set_state(ClientState::Connecting);
    }

    fn open(&mut self, socket: Socket) {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        let peer = socket.peer().map(str::to_string);
        let conn = Connection::spawn(id, socket, self.conn_tx.clone(), &self.config.connection);

        let handshake = self.config.handshake.envelope();
        conn.send(&handshake);
        self.connection = Some(conn);
        self.emit(ClientEvent::HandshakeSent(handshake));

        info!(conn = %id, peer = peer.as_deref().unwrap_or("-"), "connected");
        self.reconnect.reset();
        self.last_error = None;
        self.set_state(ClientState::Open);
    }

    fn dial_failed(&mut self, err: String) {
        warn!(error = %err, "dial failed");
        self.last_error = Some(err.clone());
        self.emit(ClientEvent::Error(err));
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.reconnect.schedule() {
            Some((attempt, delay)) => {
                warn!(
                    attempt,
                    max_attempts = self.reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.set_state(ClientState::Reconnecting);
                self.emit(ClientEvent::ReconnectScheduled { attempt, delay });
            }
            None => {
                let attempts = self.reconnect.attempts;
                warn!(attempts, "reconnect attempts exhausted");
                self.set_state(ClientState::Failed);
                self.emit(ClientEvent::Exhausted { attempts });
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.dial.take() {
            handle.abort();
        }
        self.retry = None;
        if let Some(conn) = self.connection.take() {
            conn.close(CLOSE_NORMAL, "client disconnect");
        }
    }

    fn set_state(&mut self, state: ClientState) {
        let changed = self.state != state;
        self.state = state;
        self.status.send_replace(ClientStatus {
            state,
            address: self.address.clone(),
            attempts: self.reconnect.attempts,
            max_attempts: self.reconnect.max_attempts,
            next_delay_ms: self.reconnect.next_delay.as_millis() as u64,
            last_error: self.last_error.clone(),
        });
        if changed {
            debug!(state = state.as_str(), "client state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            let dropped = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
            drop(event);
            warn!(dropped, "client event queue full, dropping event");
        }
    }
}

async fn dial_finished(
    dial: &mut Option<JoinHandle<DialResult>>,
) -> std::result::Result<DialResult, JoinError> {
    match dial {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
