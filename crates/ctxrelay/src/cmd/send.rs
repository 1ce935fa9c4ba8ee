use std::fs;

use ctxrelay_envelope::Envelope;
use ctxrelay_peer::{ClientConfig, ClientEvent, HandshakeConfig, ReconnectingClient};
use ctxrelay_transport::{normalize_url, WsDialer};
use serde_json::Value;
use tracing::debug;

use crate::cmd::{close_client, parse_duration, SendArgs};
use crate::exit::{
    decode_error, io_error, peer_error, transport_error, CliError, CliResult, FAILURE, TIMEOUT,
    USAGE,
};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let envelope = resolve_envelope(&args)?;
    let url =
        normalize_url(&args.address).map_err(|err| transport_error("invalid address", err))?;
    let connect_timeout = parse_duration(&args.timeout)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;

    let mut handshake = HandshakeConfig {
        legacy: args.legacy,
        ..HandshakeConfig::default()
    };
    if let Some(source) = &args.source {
        handshake.source = source.clone();
    }
    let config = ClientConfig {
        handshake,
        max_attempts: args.retries,
        connect_timeout,
        ..ClientConfig::default()
    };

    let (client, mut events) = ReconnectingClient::spawn(WsDialer, config)
        .map_err(|err| peer_error("invalid client config", err))?;
    client
        .connect(url.clone())
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    if let Err(err) = client.wait_open().await {
        let mut cli = peer_error(&format!("connect to {url} failed"), err);
        if let Some(last) = client.status().last_error {
            cli.message = format!("{}: {last}", cli.message);
        }
        return Err(cli);
    }

    debug!(%url, msg_type = %envelope.msg_type, "sending envelope");
    let sent = client
        .send(envelope)
        .await
        .map_err(|err| peer_error("send failed", err))?;
    if !sent {
        return Err(CliError::new(
            FAILURE,
            "send failed: connection closed before the message was queued",
        ));
    }

    if args.wait {
        let reply = tokio::time::timeout(wait_timeout, async {
            while let Some(event) = events.recv().await {
                if let ClientEvent::Message { envelope, raw } = event {
                    return Some((envelope, raw));
                }
            }
            None
        })
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("no message within {wait_timeout:?}")))?;
        match reply {
            Some((envelope, raw)) => print_message(&envelope, &raw, format),
            None => return Err(CliError::new(FAILURE, "connection closed while waiting")),
        }
    }

    close_client(&client, &mut events).await
}

fn resolve_envelope(args: &SendArgs) -> CliResult<Envelope> {
    if let Some(text) = &args.envelope {
        return ctxrelay_envelope::decode(text.as_bytes())
            .map_err(|err| decode_error("invalid --envelope", err));
    }

    let payload = if let Some(json) = &args.json {
        Some(parse_json(json, "--json")?)
    } else if let Some(data) = &args.data {
        Some(Value::String(data.clone()))
    } else if let Some(path) = &args.file {
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed to read {}", path.display()), err))?;
        Some(parse_json(&text, "--file")?)
    } else {
        None
    };

    let mut envelope = Envelope::new(args.msg_type.clone());
    if let Some(payload) = payload {
        envelope = envelope.with_payload(payload);
    }
    if let Some(source) = &args.source {
        envelope = envelope.with_source(source.clone());
    }
    Ok(envelope)
}

fn parse_json(text: &str, flag: &str) -> CliResult<Value> {
    serde_json::from_str(text)
        .map_err(|err| CliError::new(USAGE, format!("invalid {flag}: {err}")))
}
