//! In-process transport standing in for a host-messaging bridge.
//!
//! A browser extension cannot always open sockets where the instrumented app
//! runs; messages hop page → content script → background instead. This module
//! models that hop as a pair of bounded channels so that the rest of the stack
//! stays transport-agnostic.

use std::future;

use futures_util::{stream, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::error::{Result, TransportError};
use crate::traits::{Dialer, Inbound, Outbound, Socket};

/// Default per-direction buffer for proxied links.
pub const DEFAULT_PROXY_CAPACITY: usize = 256;

/// Create two connected sockets. What one side sends, the other receives.
pub fn channel_pair(capacity: usize) -> (Socket, Socket) {
    let capacity = capacity.max(1);
    let (left_tx, left_rx) = mpsc::channel(capacity);
    let (right_tx, right_rx) = mpsc::channel(capacity);
    (half(right_tx, left_rx), half(left_tx, right_rx))
}

fn half(tx: mpsc::Sender<Inbound>, rx: mpsc::Receiver<Inbound>) -> Socket {
    let sink = PollSender::new(tx)
        .sink_map_err(|_| TransportError::Closed)
        .with(|out: Outbound| future::ready(Ok::<_, TransportError>(out.into_inbound())));
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|msg| (Ok::<_, TransportError>(msg), rx))
    });
    Socket::new(Box::pin(sink), Box::pin(stream), "proxy")
}

/// Create a dialer together with the host endpoint that receives the far
/// side of every link it opens.
pub fn proxy_link(capacity: usize) -> (ProxyDialer, mpsc::Receiver<Socket>) {
    let (host, accepted) = mpsc::channel(capacity.max(1));
    (
        ProxyDialer {
            host,
            capacity: DEFAULT_PROXY_CAPACITY,
        },
        accepted,
    )
}

/// Opens links through a message-forwarding host rather than the network.
#[derive(Debug, Clone)]
pub struct ProxyDialer {
    host: mpsc::Sender<Socket>,
    capacity: usize,
}

impl ProxyDialer {
    /// Wrap an existing host endpoint.
    pub fn new(host: mpsc::Sender<Socket>) -> Self {
        Self {
            host,
            capacity: DEFAULT_PROXY_CAPACITY,
        }
    }

    /// Override the per-direction buffer of links opened by this dialer.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Dialer for ProxyDialer {
    async fn dial(&self, address: &str) -> Result<Socket> {
        let (near, far) = channel_pair(self.capacity);
        let route = format!("proxy:{address}");
        self.host
            .send(far.with_peer(Some(route.clone())))
            .await
            .map_err(|_| TransportError::Connect {
                address: route.clone(),
                reason: "proxy host is not accepting links".to_string(),
            })?;
        Ok(near.with_peer(Some(route)))
    }
}
