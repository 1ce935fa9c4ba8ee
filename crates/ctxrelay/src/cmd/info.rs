use std::time::{Duration, Instant};

use ctxrelay_peer::{
    ClientConfig, ClientEvent, ClientEvents, HandshakeResponse, ReconnectingClient,
    DEFAULT_PROTOCOL_VERSION,
};
use ctxrelay_transport::{normalize_url, WsDialer};
use serde::Serialize;

use crate::cmd::{close_client, parse_duration, InfoArgs};
use crate::exit::{peer_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_json, OutputFormat};

const DIAL_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoOutput {
    address: String,
    status: String,
    message: Option<String>,
    protocol_version: &'static str,
    handshake_latency_ms: f64,
    connected: bool,
}

pub async fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let url =
        normalize_url(&args.address).map_err(|err| transport_error("invalid address", err))?;
    let timeout = parse_duration(&args.timeout)?;

    // A relay that is still starting refuses dials; keep retrying until the deadline.
    let config = ClientConfig {
        max_attempts: u32::MAX,
        base_delay: DIAL_RETRY_DELAY,
        connect_timeout: timeout,
        ..ClientConfig::default()
    };
    let (client, mut events) = ReconnectingClient::spawn(WsDialer, config)
        .map_err(|err| peer_error("invalid client config", err))?;
    client
        .connect(url.clone())
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let (response, latency) = tokio::time::timeout(timeout, await_response(&mut events))
        .await
        .map_err(|_| {
            let detail = client
                .status()
                .last_error
                .map(|err| format!(" (last error: {err})"))
                .unwrap_or_default();
            CliError::new(TIMEOUT, format!("no handshake reply within {timeout:?}{detail}"))
        })??;

    let out = InfoOutput {
        address: url,
        connected: response.is_connected(),
        status: response.status,
        message: response.message,
        protocol_version: DEFAULT_PROTOCOL_VERSION,
        handshake_latency_ms: (latency.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    print_info(&out, format);

    close_client(&client, &mut events).await?;
    Ok(SUCCESS)
}

async fn await_response(events: &mut ClientEvents) -> CliResult<(HandshakeResponse, Duration)> {
    let mut sent_at = Instant::now();
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::HandshakeSent(_) => sent_at = Instant::now(),
            ClientEvent::HandshakeResponse(response) => return Ok((response, sent_at.elapsed())),
            _ => {}
        }
    }
    Err(CliError::new(FAILURE, "client stopped before the relay answered"))
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Relay Info:");
            println!("  Address:          {}", out.address);
            println!("  Status:           {}", out.status);
            println!(
                "  Greeting:         {}",
                out.message.as_deref().unwrap_or("-")
            );
            println!("  Protocol:         {}", out.protocol_version);
            println!("  Handshake:        {:.2}ms", out.handshake_latency_ms);
        }
        OutputFormat::Raw => {
            println!("{}", out.status);
        }
    }
}
