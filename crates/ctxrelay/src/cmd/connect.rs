use ctxrelay_peer::{
    Backoff, ClientConfig, ClientEvent, ClientState, HandshakeConfig, ReconnectingClient,
};
use ctxrelay_transport::{normalize_url, WsDialer};
use tracing::{debug, info, warn};

use crate::cmd::{close_client, parse_duration, BackoffArg, ConnectArgs};
use crate::exit::{peer_error, transport_error, CliError, CliResult, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let url =
        normalize_url(&args.address).map_err(|err| transport_error("invalid address", err))?;
    let config = client_config(&args)?;

    let (client, mut events) = ReconnectingClient::spawn(WsDialer, config)
        .map_err(|err| peer_error("invalid client config", err))?;
    client
        .connect(url.clone())
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    info!(%url, retries = args.retries, "connecting");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match handle_event(event, format)? {
                    Flow::Printed => {
                        printed = printed.saturating_add(1);
                        if args.count.is_some_and(|count| printed >= count) {
                            break;
                        }
                    }
                    Flow::Continue => {}
                    Flow::Done => break,
                }
            }
        }
    }

    close_client(&client, &mut events).await
}

enum Flow {
    Printed,
    Continue,
    /// The relay closed the session normally; nothing will be retried.
    Done,
}

fn handle_event(event: ClientEvent, format: OutputFormat) -> CliResult<Flow> {
    match event {
        ClientEvent::Message { envelope, raw } => {
            print_message(&envelope, &raw, format);
            return Ok(Flow::Printed);
        }
        ClientEvent::StateChanged(ClientState::Idle) => {
            info!("relay closed the session");
            return Ok(Flow::Done);
        }
        ClientEvent::StateChanged(state) => info!(state = state.as_str(), "client state"),
        ClientEvent::HandshakeSent(envelope) => {
            debug!(msg_type = %envelope.msg_type, "handshake sent")
        }
        ClientEvent::HandshakeResponse(response) => info!(
            status = %response.status,
            message = response.message.as_deref().unwrap_or(""),
            "relay answered handshake"
        ),
        ClientEvent::DecodeError(err) => warn!(error = %err, "dropped malformed message"),
        ClientEvent::Error(err) => warn!(error = %err, "connection error"),
        ClientEvent::Closed { code } => info!(code, "connection closed"),
        ClientEvent::ReconnectScheduled { attempt, delay } => {
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled")
        }
        ClientEvent::Exhausted { attempts } => {
            return Err(CliError::new(
                TRANSPORT_ERROR,
                format!("gave up after {attempts} reconnect attempt(s)"),
            ));
        }
    }
    Ok(Flow::Continue)
}

fn client_config(args: &ConnectArgs) -> CliResult<ClientConfig> {
    let base_delay = parse_duration(&args.delay)?;
    let backoff = match args.backoff {
        BackoffArg::Constant => Backoff::Constant,
        BackoffArg::Exponential => Backoff::Exponential {
            factor: 2.0,
            max: parse_duration(&args.max_delay)?,
        },
    };
    Ok(ClientConfig {
        handshake: HandshakeConfig {
            legacy: args.legacy,
            ..HandshakeConfig::default()
        },
        max_attempts: args.retries,
        base_delay,
        backoff,
        ..ClientConfig::default()
    })
}
