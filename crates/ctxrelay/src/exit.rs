use std::fmt;
use std::io;

use ctxrelay_envelope::DecodeError;
use ctxrelay_peer::PeerError;
use ctxrelay_relay::RelayError;
use ctxrelay_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::InvalidAddress(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn decode_error(context: &str, err: DecodeError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Decode(err) => decode_error(context, err),
        PeerError::HandshakeFailed(_) | PeerError::ReconnectExhausted { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        PeerError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::Closed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Bind { addr, source } => {
            transport_error(&format!("{context} on {addr}"), source)
        }
        RelayError::Transport(err) => transport_error(context, err),
        RelayError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        RelayError::NotRunning => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn bind_conflict_is_transport_error() {
        let err = RelayError::Bind {
            addr: "127.0.0.1:8097".parse().unwrap(),
            source: TransportError::Bind {
                addr: "127.0.0.1:8097".parse().unwrap(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            },
        };
        let cli = relay_error("start failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.contains("127.0.0.1:8097"));
    }

    #[test]
    fn config_errors_are_usage() {
        let cli = relay_error("start failed", RelayError::Config("port 80".to_string()));
        assert_eq!(cli.code, USAGE);
        let cli = peer_error("bad flags", PeerError::InvalidConfig("x".to_string()));
        assert_eq!(cli.code, USAGE);
    }

    #[test]
    fn timeouts_map_to_124() {
        let err = PeerError::Transport(TransportError::Timeout(Duration::from_secs(1)));
        assert_eq!(peer_error("connect failed", err).code, TIMEOUT);
    }

    #[test]
    fn exhausted_is_transport_error() {
        let err = PeerError::ReconnectExhausted { attempts: 5 };
        assert_eq!(peer_error("connect failed", err).code, TRANSPORT_ERROR);
    }
}
