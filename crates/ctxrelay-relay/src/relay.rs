//! The listening broker.
//!
//! A [`Relay`] is a handle; the work happens in one actor task per running
//! listener. The actor owns the [`Registry`] and serializes accepts,
//! connection events, commands and the optional handshake sweep through a
//! single `select!` loop.

use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ctxrelay_envelope::{encode, Envelope};
use ctxrelay_peer::{
    handshake_reply, Connection, ConnectionEvent, ConnectionId, EventKind, HandshakeRequest,
    CLOSE_NORMAL, CLOSE_POLICY,
};
use ctxrelay_transport::{
    proxy_link, upgrade, ProxyDialer, Socket, WsListener, DEFAULT_PROXY_CAPACITY,
};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{validate_port, RelayConfig};
use crate::error::{RelayError, Result};
use crate::registry::{ClientInfo, Entry, Registry};
use crate::status::{compute_status, SessionStatus};

const COMMAND_CAPACITY: usize = 64;
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(25);

/// Something that happened inside the relay, for UI observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RelayEvent {
    Connected {
        id: ConnectionId,
        peer: Option<String>,
    },
    Disconnected {
        id: ConnectionId,
        code: u16,
    },
    Handshake {
        id: ConnectionId,
        source: Option<String>,
        version: Option<String>,
    },
    /// A routed envelope. Handshakes are reported as [`RelayEvent::Handshake`].
    Message {
        id: ConnectionId,
        envelope: Envelope,
    },
    DecodeFailed {
        id: ConnectionId,
        error: String,
    },
    TransportError {
        id: Option<ConnectionId>,
        error: String,
    },
}

enum Command {
    Attach {
        socket: Socket,
        reply: Option<oneshot::Sender<ConnectionId>>,
    },
    Broadcast {
        bytes: Bytes,
        reply: oneshot::Sender<usize>,
    },
    Clients {
        reply: oneshot::Sender<Vec<ClientInfo>>,
    },
    DisconnectAll {
        reply: oneshot::Sender<usize>,
    },
}

struct Running {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// WebSocket relay between instrumented apps and devtools UIs.
///
/// Each `Relay` is an independent instance with its own registry; nothing is
/// process-global.
pub struct Relay {
    config: RelayConfig,
    status: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<RelayEvent>,
    next_id: Arc<AtomicU64>,
    running: Option<Running>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let (status, _) = watch::channel(SessionStatus::default());
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            status: Arc::new(status),
            events,
            next_id: Arc::new(AtomicU64::new(1)),
            running: None,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Listen on `port` of the configured host. Ports below 1024 are refused.
    ///
    /// Starting a running relay restarts it. A failed bind leaves a relay
    /// running on another port untouched and records the error in the status.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr> {
        let port = validate_port(port)?;
        self.start_at(SocketAddr::new(self.config.host, port)).await
    }

    /// Listen on an explicit address. Port 0 picks a free port.
    pub async fn start_at(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        let same_port = self
            .running
            .as_ref()
            .is_some_and(|r| addr.port() != 0 && r.local_addr.port() == addr.port());
        if same_port {
            info!(port = addr.port(), "restarting relay");
            self.stop().await;
        }

        let listener = match WsListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = RelayError::Bind { addr, source };
                warn!(error = %err, "relay failed to start");
                self.status
                    .send_modify(|status| status.last_error = Some(err.to_string()));
                return Err(err);
            }
        };
        self.stop().await;

        let local_addr = listener.local_addr();
        self.status.send_replace(compute_status(
            &Registry::new(),
            Some(local_addr.port()),
            None,
            true,
        ));

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sweep = self.config.handshake_timeout.map(|timeout| {
            let mut interval = tokio::time::interval((timeout / 4).max(MIN_SWEEP_PERIOD));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let actor = Actor {
            listener,
            config: self.config.clone(),
            port: local_addr.port(),
            commands: commands_rx,
            loopback: commands_tx.clone(),
            registry: Registry::new(),
            conn_tx,
            conn_rx,
            status: Arc::clone(&self.status),
            events: self.events.clone(),
            cancel: cancel.clone(),
            next_id: Arc::clone(&self.next_id),
            sweep,
        };
        let task = tokio::spawn(actor.run());

        info!(%local_addr, "relay started");
        self.running = Some(Running {
            commands: commands_tx,
            cancel,
            task,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Close the listener and every connection (code 1000). Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(err) = running.task.await {
            warn!(error = %err, "relay task ended abnormally");
        }
        self.status.send_modify(|status| {
            let next = compute_status(&Registry::new(), None, status.last_error.as_deref(), false);
            *status = next;
        });
        info!(local_addr = %running.local_addr, "relay stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Register an already-established socket (e.g. a proxied one).
    pub async fn attach(&self, socket: Socket) -> Result<ConnectionId> {
        let (reply, attached) = oneshot::channel();
        self.command(Command::Attach {
            socket,
            reply: Some(reply),
        })
        .await?;
        attached.await.map_err(|_| RelayError::NotRunning)
    }

    /// Finish the WebSocket upgrade of a TCP stream accepted elsewhere, then
    /// register it.
    pub async fn accept_upgrade(&self, stream: TcpStream, peer: SocketAddr) -> Result<ConnectionId> {
        if !self.is_running() {
            return Err(RelayError::NotRunning);
        }
        let socket = upgrade(stream, peer).await?;
        self.attach(socket).await
    }

    /// Send `envelope` to every registered connection. Returns how many
    /// connections the relay had at the time.
    pub async fn send_to_all(&self, envelope: &Envelope) -> Result<usize> {
        let (reply, sent) = oneshot::channel();
        self.command(Command::Broadcast {
            bytes: encode(envelope),
            reply,
        })
        .await?;
        sent.await.map_err(|_| RelayError::NotRunning)
    }

    /// Close every connection with code 1000 and empty the registry. The
    /// listener keeps accepting. Returns how many peers were dropped.
    pub async fn disconnect_all(&self) -> Result<usize> {
        let (reply, dropped) = oneshot::channel();
        self.command(Command::DisconnectAll { reply }).await?;
        dropped.await.map_err(|_| RelayError::NotRunning)
    }

    /// Snapshot of the registry.
    pub async fn clients(&self) -> Result<Vec<ClientInfo>> {
        let (reply, infos) = oneshot::channel();
        self.command(Command::Clients { reply }).await?;
        infos.await.map_err(|_| RelayError::NotRunning)
    }

    /// A dialer whose links terminate in this relay, for peers behind a
    /// host-messaging bridge.
    pub fn proxy_dialer(&self) -> Result<ProxyDialer> {
        let running = self.running.as_ref().ok_or(RelayError::NotRunning)?;
        let (dialer, mut links) = proxy_link(DEFAULT_PROXY_CAPACITY);
        let commands = running.commands.clone();
        tokio::spawn(async move {
            while let Some(socket) = links.recv().await {
                let attach = Command::Attach {
                    socket,
                    reply: None,
                };
                if commands.send(attach).await.is_err() {
                    break;
                }
            }
        });
        Ok(dialer)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    async fn command(&self, command: Command) -> Result<()> {
        let running = self.running.as_ref().ok_or(RelayError::NotRunning)?;
        running
            .commands
            .send(command)
            .await
            .map_err(|_| RelayError::NotRunning)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

struct Actor {
    listener: WsListener,
    config: RelayConfig,
    port: u16,
    commands: mpsc::Receiver<Command>,
    loopback: mpsc::Sender<Command>,
    registry: Registry,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    status: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<RelayEvent>,
    cancel: CancellationToken,
    next_id: Arc<AtomicU64>,
    sweep: Option<Interval>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(event) = self.conn_rx.recv() => self.handle_connection_event(event),
                Some(command) = self.commands.recv() => self.handle_command(command),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_upgrade(stream, peer),
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        self.record_error(None, err.to_string());
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
                () = sweep_tick(&mut self.sweep) => self.sweep_handshakes(),
            }
        }
        self.shutdown();
    }

    fn spawn_upgrade(&self, stream: TcpStream, peer: SocketAddr) {
        let loopback = self.loopback.clone();
        let cancel = self.cancel.clone();
        let timeout = self.config.upgrade_timeout;
        let events = self.events.clone();
        tokio::spawn(async move {
            let upgraded = tokio::select! {
                () = cancel.cancelled() => return,
                upgraded = tokio::time::timeout(timeout, upgrade(stream, peer)) => upgraded,
            };
            match upgraded {
                Ok(Ok(socket)) => {
                    let attach = Command::Attach {
                        socket,
                        reply: None,
                    };
                    let _ = loopback.send(attach).await;
                }
                Ok(Err(err)) => {
                    warn!(%peer, error = %err, "websocket upgrade failed");
                    let _ = events.send(RelayEvent::TransportError {
                        id: None,
                        error: err.to_string(),
                    });
                }
                Err(_) => warn!(%peer, ?timeout, "websocket upgrade timed out"),
            }
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Attach { socket, reply } => {
                let id = self.attach(socket);
                if let Some(reply) = reply {
                    let _ = reply.send(id);
                }
            }
            Command::Broadcast { bytes, reply } => {
                let count = self.registry.len();
                let delivered = self
                    .registry
                    .iter()
                    .filter(|entry| entry.connection.send_raw(bytes.clone()))
                    .count();
                info!(clients = count, delivered, "sent to all clients");
                let _ = reply.send(count);
            }
            Command::Clients { reply } => {
                let _ = reply.send(self.registry.infos());
            }
            Command::DisconnectAll { reply } => {
                let dropped = self.close_all("clients disconnected");
                info!(dropped, "disconnected all clients");
                self.publish();
                let _ = reply.send(dropped);
            }
        }
    }

    fn attach(&mut self, socket: Socket) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let peer = socket.peer().map(str::to_string);
        let transport = socket.kind();
        let connection =
            Connection::spawn(id, socket, self.conn_tx.clone(), &self.config.connection);
        self.registry.insert(Entry::new(connection));

        info!(
            conn = %id,
            peer = peer.as_deref().unwrap_or("-"),
            transport,
            clients = self.registry.len(),
            "client connected"
        );
        self.emit(RelayEvent::Connected { id, peer });
        self.publish();
        id
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let id = event.id;
        match event.kind {
            EventKind::Open => {}
            EventKind::Message { envelope, raw } => {
                if let Some(request) = HandshakeRequest::from_envelope(&envelope) {
                    self.handshake(id, request);
                } else {
                    self.route(id, envelope, raw);
                }
            }
            EventKind::DecodeError(err) => {
                self.emit(RelayEvent::DecodeFailed {
                    id,
                    error: err.to_string(),
                });
            }
            EventKind::Error(err) => {
                warn!(conn = %id, error = %err, "connection error");
                self.record_error(Some(id), err);
            }
            EventKind::Closed { code } => {
                if self.registry.remove(id).is_some() {
                    info!(conn = %id, code, clients = self.registry.len(), "client disconnected");
                    self.emit(RelayEvent::Disconnected { id, code });
                    self.publish();
                }
            }
        }
    }

    fn handshake(&mut self, id: ConnectionId, request: HandshakeRequest) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        if !request.is_compatible_with(&self.config.protocol_version) {
            warn!(
                conn = %id,
                peer_version = request.version.as_deref().unwrap_or("-"),
                relay_version = %self.config.protocol_version,
                "peer speaks a different protocol major version"
            );
        }
        entry.connection.send(&handshake_reply(&self.config.greeting));
        info!(
            conn = %id,
            source = request.source.as_deref().unwrap_or("-"),
            version = request.version.as_deref().unwrap_or("-"),
            "handshake"
        );
        let event = RelayEvent::Handshake {
            id,
            source: request.source.clone(),
            version: request.version.clone(),
        };
        entry.handshake = Some(request);
        self.emit(event);
    }

    fn route(&mut self, id: ConnectionId, envelope: Envelope, raw: Bytes) {
        if self.config.require_handshake
            && self
                .registry
                .get(id)
                .is_some_and(|entry| entry.handshake.is_none())
        {
            warn!(conn = %id, msg_type = %envelope.msg_type, "dropping message from peer without handshake");
            return;
        }

        let mut forwarded = 0usize;
        for entry in self.registry.others(id) {
            if entry.connection.send_raw(raw.clone()) {
                forwarded += 1;
            }
        }
        debug!(conn = %id, msg_type = %envelope.msg_type, forwarded, "routed message");
        self.emit(RelayEvent::Message { id, envelope });
    }

    fn sweep_handshakes(&mut self) {
        let Some(timeout) = self.config.handshake_timeout else {
            return;
        };
        for entry in self.registry.iter() {
            if entry.handshake_overdue(timeout) && entry.connection.is_open() {
                warn!(conn = %entry.id(), ?timeout, "closing peer that never sent a handshake");
                entry.connection.close(CLOSE_POLICY, "handshake timeout");
            }
        }
    }

    fn record_error(&mut self, id: Option<ConnectionId>, error: String) {
        self.status
            .send_modify(|status| status.last_error = Some(error.clone()));
        self.emit(RelayEvent::TransportError { id, error });
        self.publish();
    }

    fn publish(&self) {
        let last_error = self.status.borrow().last_error.clone();
        self.status.send_replace(compute_status(
            &self.registry,
            Some(self.port),
            last_error.as_deref(),
            true,
        ));
    }

    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    /// Drain the registry, closing each connection normally. Their later
    /// `Closed` events find no entry and are ignored.
    fn close_all(&mut self, reason: &str) -> usize {
        let entries: Vec<Entry> = self.registry.drain().collect();
        let count = entries.len();
        for entry in entries {
            let id = entry.id();
            entry.connection.close(CLOSE_NORMAL, reason);
            self.emit(RelayEvent::Disconnected {
                id,
                code: CLOSE_NORMAL,
            });
        }
        count
    }

    fn shutdown(&mut self) {
        self.close_all("relay stopped");
        debug!(port = self.port, "relay actor stopped");
    }
}

async fn sweep_tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use ctxrelay_envelope::{decode, HANDSHAKE_RESPONSE};
    use ctxrelay_transport::{Dialer, Inbound, Outbound};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn started(config: RelayConfig) -> Relay {
        let mut relay = Relay::new(config).unwrap();
        relay.start_at(any_port()).await.unwrap();
        relay
    }

    async fn wait_for_count(relay: &Relay, count: usize) {
        let mut status = relay.subscribe_status();
        tokio::time::timeout(WAIT, status.wait_for(|s| s.client_count == count))
            .await
            .expect("client count should settle")
            .unwrap();
    }

    async fn join(relay: &Relay, dialer: &ProxyDialer, name: &str) -> Socket {
        let before = relay.status().client_count;
        let socket = dialer.dial(name).await.unwrap();
        wait_for_count(relay, before + 1).await;
        socket
    }

    async fn send(socket: &mut Socket, envelope: &Envelope) {
        socket
            .sink
            .send(Outbound::Message(encode(envelope)))
            .await
            .unwrap();
    }

    async fn recv(socket: &mut Socket) -> Inbound {
        tokio::time::timeout(WAIT, socket.stream.next())
            .await
            .expect("peer should receive")
            .expect("stream open")
            .unwrap()
    }

    async fn recv_envelope(socket: &mut Socket) -> Envelope {
        match recv(socket).await {
            Inbound::Message(bytes) => decode(&bytes).unwrap(),
            other => panic!("expected message, got {other:?}"),
        }
    }

    async fn nothing_arrives(socket: &mut Socket) {
        let next = tokio::time::timeout(Duration::from_millis(150), socket.stream.next()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }

    #[tokio::test]
    async fn start_rejects_privileged_port() {
        let mut relay = Relay::new(RelayConfig::default()).unwrap();
        assert!(matches!(relay.start(80).await, Err(RelayError::Config(_))));
        assert!(!relay.is_running());
    }

    #[tokio::test]
    async fn operations_require_running_relay() {
        let relay = Relay::new(RelayConfig::default()).unwrap();
        assert!(matches!(
            relay.send_to_all(&Envelope::new("x")).await,
            Err(RelayError::NotRunning)
        ));
        assert!(matches!(relay.clients().await, Err(RelayError::NotRunning)));
        assert!(matches!(relay.proxy_dialer(), Err(RelayError::NotRunning)));
    }

    #[tokio::test]
    async fn handshake_reply_goes_to_sender_only() {
        let relay = started(RelayConfig::default()).await;
        let dialer = relay.proxy_dialer().unwrap();
        let mut app = join(&relay, &dialer, "app").await;
        let mut ui = join(&relay, &dialer, "ui").await;

        send(&mut app, &Envelope::handshake("react-app", "4.4")).await;
        let reply = recv_envelope(&mut app).await;
        assert_eq!(reply.msg_type, HANDSHAKE_RESPONSE);
        assert_eq!(reply.str_field("status"), Some("connected"));
        nothing_arrives(&mut ui).await;

        let clients = relay.clients().await.unwrap();
        let app_info = clients.iter().find(|c| c.handshaken).unwrap();
        assert_eq!(app_info.source.as_deref(), Some("react-app"));
        assert_eq!(app_info.version.as_deref(), Some("4.4"));
    }

    #[tokio::test]
    async fn messages_fan_out_to_everyone_but_the_sender() {
        let relay = started(RelayConfig::default()).await;
        let mut events = relay.subscribe_events();
        let dialer = relay.proxy_dialer().unwrap();
        let mut a = join(&relay, &dialer, "a").await;
        let mut b = join(&relay, &dialer, "b").await;
        let mut c = join(&relay, &dialer, "c").await;

        let raw = br#"{"type":"react-context-devtool-data","payload":{"n":1},"custom":true}"#;
        a.sink
            .send(Outbound::Message(Bytes::from_static(raw)))
            .await
            .unwrap();

        for peer in [&mut b, &mut c] {
            assert_eq!(recv(peer).await, Inbound::Message(Bytes::from_static(raw)));
        }
        nothing_arrives(&mut a).await;

        loop {
            let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if let RelayEvent::Message { envelope, .. } = event {
                assert_eq!(envelope.payload, Some(json!({"n": 1})));
                break;
            }
        }
    }

    #[tokio::test]
    async fn send_to_all_reaches_every_peer() {
        let relay = started(RelayConfig::default()).await;
        let dialer = relay.proxy_dialer().unwrap();
        let mut a = join(&relay, &dialer, "a").await;
        let mut b = join(&relay, &dialer, "b").await;

        let action = Envelope::action_dispatch("ctx", json!({"type": "reset"}));
        assert_eq!(relay.send_to_all(&action).await.unwrap(), 2);
        assert_eq!(recv_envelope(&mut a).await, action);
        assert_eq!(recv_envelope(&mut b).await, action);
    }

    #[tokio::test]
    async fn undecodable_message_keeps_connection() {
        let relay = started(RelayConfig::default()).await;
        let mut events = relay.subscribe_events();
        let dialer = relay.proxy_dialer().unwrap();
        let mut a = join(&relay, &dialer, "a").await;
        let mut b = join(&relay, &dialer, "b").await;

        a.sink
            .send(Outbound::Message(Bytes::from_static(b"{not json")))
            .await
            .unwrap();
        send(&mut a, &Envelope::context_data(json!({"ok": true}))).await;

        assert_eq!(recv_envelope(&mut b).await.payload, Some(json!({"ok": true})));
        assert_eq!(relay.status().client_count, 2);
        let mut saw_decode_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_decode_failure |= matches!(event, RelayEvent::DecodeFailed { .. });
        }
        assert!(saw_decode_failure);
    }

    #[tokio::test]
    async fn require_handshake_drops_unannounced_traffic() {
        let config = RelayConfig {
            require_handshake: true,
            ..RelayConfig::default()
        };
        let relay = started(config).await;
        let dialer = relay.proxy_dialer().unwrap();
        let mut app = join(&relay, &dialer, "app").await;
        let mut ui = join(&relay, &dialer, "ui").await;

        send(&mut app, &Envelope::context_data(json!(1))).await;
        nothing_arrives(&mut ui).await;

        send(&mut app, &Envelope::handshake("react-app", "4.4")).await;
        let _reply = recv_envelope(&mut app).await;
        send(&mut app, &Envelope::context_data(json!(2))).await;
        assert_eq!(recv_envelope(&mut ui).await.payload, Some(json!(2)));
    }

    #[tokio::test]
    async fn handshake_timeout_closes_silent_peers() {
        let config = RelayConfig {
            handshake_timeout: Some(Duration::from_millis(100)),
            ..RelayConfig::default()
        };
        let relay = started(config).await;
        let dialer = relay.proxy_dialer().unwrap();
        let mut silent = join(&relay, &dialer, "silent").await;
        let mut polite = join(&relay, &dialer, "polite").await;
        send(&mut polite, &Envelope::handshake("ui", "4.4")).await;
        let _reply = recv_envelope(&mut polite).await;

        assert_eq!(recv(&mut silent).await, Inbound::Close(Some(CLOSE_POLICY)));
        wait_for_count(&relay, 1).await;
    }

    #[tokio::test]
    async fn disconnect_updates_count() {
        let relay = started(RelayConfig::default()).await;
        let dialer = relay.proxy_dialer().unwrap();
        let a = join(&relay, &dialer, "a").await;
        let _b = join(&relay, &dialer, "b").await;
        assert!(relay.status().connected);

        drop(a);
        wait_for_count(&relay, 1).await;
        assert_eq!(relay.clients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_peers() {
        let mut relay = started(RelayConfig::default()).await;
        let dialer = relay.proxy_dialer().unwrap();
        let mut a = join(&relay, &dialer, "a").await;

        relay.stop().await;
        relay.stop().await;

        assert_eq!(recv(&mut a).await, Inbound::Close(Some(CLOSE_NORMAL)));
        let status = relay.status();
        assert!(!status.running);
        assert!(!status.connected);
        assert_eq!(status.client_count, 0);
        assert_eq!(status.port, None);
        assert!(matches!(
            relay.send_to_all(&Envelope::new("x")).await,
            Err(RelayError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn disconnect_all_keeps_listening() {
        let relay = started(RelayConfig::default()).await;
        let mut events = relay.subscribe_events();
        let dialer = relay.proxy_dialer().unwrap();
        let mut a = join(&relay, &dialer, "a").await;
        let mut b = join(&relay, &dialer, "b").await;

        assert_eq!(relay.disconnect_all().await.unwrap(), 2);
        assert_eq!(recv(&mut a).await, Inbound::Close(Some(CLOSE_NORMAL)));
        assert_eq!(recv(&mut b).await, Inbound::Close(Some(CLOSE_NORMAL)));

        let status = relay.status();
        assert!(relay.is_running());
        assert!(status.running);
        assert!(!status.connected);
        assert_eq!(status.client_count, 0);
        assert_eq!(status.port, relay.local_addr().map(|addr| addr.port()));

        let mut disconnected = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RelayEvent::Disconnected { code: CLOSE_NORMAL, .. }) {
                disconnected += 1;
            }
        }
        assert_eq!(disconnected, 2);

        let mut c = join(&relay, &dialer, "c").await;
        send(&mut c, &Envelope::handshake("ui", "4.4")).await;
        assert_eq!(recv_envelope(&mut c).await.msg_type, HANDSHAKE_RESPONSE);
        assert_eq!(relay.disconnect_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_bind_leaves_running_relay_alone() {
        let holder = started(RelayConfig::default()).await;
        let taken = holder.local_addr().unwrap();

        let mut relay = started(RelayConfig::default()).await;
        let original = relay.local_addr().unwrap();
        let err = relay.start_at(taken).await.err().unwrap();
        assert!(matches!(err, RelayError::Bind { .. }));

        assert!(relay.is_running());
        assert_eq!(relay.local_addr(), Some(original));
        let status = relay.status();
        assert!(status.running);
        assert!(status.last_error.is_some());
        assert!(holder.is_running());
    }

    #[tokio::test]
    async fn restart_on_same_port() {
        let mut relay = started(RelayConfig::default()).await;
        let addr = relay.local_addr().unwrap();
        assert_eq!(relay.start_at(addr).await.unwrap(), addr);
        assert!(relay.is_running());
        assert_eq!(relay.status().port, Some(addr.port()));
    }
}
