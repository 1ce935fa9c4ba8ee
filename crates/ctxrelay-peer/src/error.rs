/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctxrelay_transport::TransportError),

    /// Envelope decoding error.
    #[error("decode error: {0}")]
    Decode(#[from] ctxrelay_envelope::DecodeError),

    /// Handshake metadata was rejected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Every scheduled reconnect failed; a manual `connect` is required.
    #[error("reconnect attempts exhausted after {attempts} retries")]
    ReconnectExhausted { attempts: u32 },

    /// The client task or connection is gone.
    #[error("closed: {0}")]
    Closed(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
