use std::net::SocketAddr;

use ctxrelay_transport::TransportError;

/// Errors surfaced by relay lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listening socket could not be bound (usually: port in use).
    #[error("failed to start relay on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: TransportError,
    },

    /// A configuration value is out of range.
    #[error("invalid relay configuration: {0}")]
    Config(String),

    /// The operation needs a running relay.
    #[error("relay is not running")]
    NotRunning,

    /// Transport-level error outside of bind.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
