use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use ctxrelay_peer::{ClientEvent, ClientEvents, ClientState, ReconnectingClient};

use crate::exit::{io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub mod connect;
pub mod info;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a relay and print its events.
    Serve(ServeArgs),
    /// Send one envelope through a relay.
    Send(SendArgs),
    /// Stay connected to a relay and print what arrives.
    Connect(ConnectArgs),
    /// Dial a relay and print its handshake reply.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Connect(args) => block_on(connect::run(args, format)),
        Command::Info(args) => block_on(info::run(args, format)),
        Command::Version(args) => version::run(args, format),
    }
}

fn block_on<F: Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (1024-65535).
    #[arg(long, short = 'p', default_value_t = 8097, env = "CTXRELAY_PORT")]
    pub port: u16,
    /// Interface to listen on.
    #[arg(long, default_value = "127.0.0.1", env = "CTXRELAY_HOST")]
    pub host: IpAddr,
    /// Drop traffic from peers that have not sent a handshake.
    #[arg(long, env = "CTXRELAY_REQUIRE_HANDSHAKE")]
    pub require_handshake: bool,
    /// Close peers that send no handshake within this window (e.g. 10s).
    #[arg(long, value_name = "DURATION", env = "CTXRELAY_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: Option<String>,
    /// Exit after relaying N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay address: port, host:port or ws:// URL.
    pub address: String,
    /// Envelope type.
    #[arg(long = "type", short = 't', default_value = "context-data", conflicts_with = "envelope")]
    pub msg_type: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file", "envelope"])]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with_all = ["json", "file", "envelope"])]
    pub data: Option<String>,
    /// Read a JSON payload from file.
    #[arg(long, conflicts_with_all = ["json", "data", "envelope"])]
    pub file: Option<PathBuf>,
    /// Complete envelope JSON, sent as given.
    #[arg(long, conflicts_with_all = ["json", "data", "file"])]
    pub envelope: Option<String>,
    /// Source tag for the handshake and, unless --envelope is given, the envelope.
    #[arg(long)]
    pub source: Option<String>,
    /// Announce with the legacy handshake tag.
    #[arg(long)]
    pub legacy: bool,
    /// Reconnect attempts if the first dial fails.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Wait for one message back and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set.
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum BackoffArg {
    Constant,
    Exponential,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Relay address: port, host:port or ws:// URL.
    pub address: String,
    /// Reconnect attempts after a failed dial or lost connection.
    #[arg(long, default_value_t = 5, env = "CTXRELAY_RETRIES")]
    pub retries: u32,
    /// Delay before the first reconnect (e.g. 2s).
    #[arg(long, default_value = "2s", env = "CTXRELAY_RETRY_DELAY")]
    pub delay: String,
    /// How the reconnect delay grows.
    #[arg(long, value_enum, default_value = "constant")]
    pub backoff: BackoffArg,
    /// Longest reconnect delay under exponential backoff.
    #[arg(long, default_value = "30s")]
    pub max_delay: String,
    /// Announce with the legacy handshake tag.
    #[arg(long)]
    pub legacy: bool,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Relay address: port, host:port or ws:// URL.
    pub address: String,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Disconnect and wait for the close frame to go out before the process exits.
pub async fn close_client(client: &ReconnectingClient, events: &mut ClientEvents) -> CliResult<i32> {
    if client.disconnect().await.is_err() {
        return Ok(SUCCESS);
    }
    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        if client.status().state == ClientState::Idle {
            return;
        }
        while let Some(event) = events.recv().await {
            if matches!(event, ClientEvent::StateChanged(ClientState::Idle)) {
                return;
            }
        }
    })
    .await;
    if settled.is_err() {
        tracing::warn!("relay did not acknowledge close in time");
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
        assert_eq!(parse_duration("1m").unwrap_err().code, USAGE);
    }
}
