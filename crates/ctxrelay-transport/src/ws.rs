use std::future;
use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{Dialer, Inbound, Outbound, Socket};

/// Host used when an address is given as a bare port.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Wrap an established WebSocket stream as a [`Socket`].
///
/// Ping/pong frames are answered by tungstenite and never surface.
pub fn websocket_socket<S>(ws: WebSocketStream<S>, peer: Option<String>) -> Socket
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let sink = sink.with(|out: Outbound| future::ready(Ok::<_, TransportError>(to_message(out))));
    let stream = stream.filter_map(|item| future::ready(from_message(item)));
    Socket::new(Box::pin(sink), Box::pin(stream), "websocket").with_peer(peer)
}

fn to_message(out: Outbound) -> Message {
    match out {
        Outbound::Message(bytes) => Message::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(item: std::result::Result<Message, tungstenite::Error>) -> Option<Result<Inbound>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Message(Bytes::from(text)))),
        Ok(Message::Binary(data)) => Some(Ok(Inbound::Message(Bytes::from(data)))),
        Ok(Message::Close(frame)) => Some(Ok(Inbound::Close(
            frame.map(|frame| u16::from(frame.code)),
        ))),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(err) => Some(Err(TransportError::WebSocket(err))),
    }
}

/// Turn a user-supplied address into a `ws://` URL.
///
/// Accepts a bare port (`8097`), `host:port`, or a full `ws://` URL.
pub fn normalize_url(address: &str) -> Result<String> {
    let address = address.trim();
    if address.is_empty() {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    if let Ok(port) = address.parse::<u16>() {
        return Ok(format!("ws://{DEFAULT_HOST}:{port}"));
    }
    if address.starts_with("ws://") {
        return Ok(address.to_string());
    }
    if address.contains("://") {
        // wss:// would need a TLS stack; the relay only serves local plaintext sockets.
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    Ok(format!("ws://{address}"))
}

/// Dials relays directly over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsDialer;

impl Dialer for WsDialer {
    async fn dial(&self, address: &str) -> Result<Socket> {
        let url = normalize_url(address)?;
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect {
                address: url.clone(),
                reason: err.to_string(),
            })?;
        debug!(%url, "websocket connected");
        Ok(websocket_socket(ws, Some(url)))
    }
}

/// Listening TCP socket that accepts WebSocket upgrades.
pub struct WsListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WsListener {
    /// Bind and listen on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for websocket connections");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next TCP connection. Call [`upgrade`] to finish the
    /// WebSocket handshake off the accept path.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await.map_err(TransportError::Accept)
    }

    /// Bound address (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Complete the server side of the WebSocket handshake.
pub async fn upgrade(stream: TcpStream, peer: SocketAddr) -> Result<Socket> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    Ok(websocket_socket(ws, Some(peer.to_string())))
}
