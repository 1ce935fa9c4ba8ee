use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ctxrelay_envelope::Envelope;
use ctxrelay_relay::{RelayEvent, SessionStatus};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn print_row(header: &[&str], row: Vec<String>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec())
        .add_row(row);
    println!("{table}");
}

pub fn print_status(status: &SessionStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(status),
        OutputFormat::Table => print_row(
            &["RUNNING", "PORT", "CLIENTS", "CONNECTED", "LAST ERROR"],
            vec![
                status.running.to_string(),
                optional(status.port),
                status.client_count.to_string(),
                status.connected.to_string(),
                status.last_error.clone().unwrap_or_else(|| "-".to_string()),
            ],
        ),
        OutputFormat::Pretty => {
            println!(
                "running={} port={} clients={} connected={} last_error={}",
                status.running,
                optional(status.port),
                status.client_count,
                status.connected,
                status.last_error.as_deref().unwrap_or("-")
            );
        }
    }
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    timestamp: String,
    #[serde(flatten)]
    inner: &'a T,
}

pub fn print_relay_event(event: &RelayEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&Stamped {
            timestamp: now_unix_seconds(),
            inner: event,
        }),
        OutputFormat::Table => {
            let (name, conn, detail) = describe(event);
            print_row(&["EVENT", "CONN", "DETAIL"], vec![name.to_string(), conn, detail]);
        }
        OutputFormat::Pretty => {
            let (name, conn, detail) = describe(event);
            println!("event={name} conn={conn} {detail}");
        }
        OutputFormat::Raw => {
            if let RelayEvent::Message { envelope, .. } = event {
                print_raw(&ctxrelay_envelope::encode(envelope));
            }
        }
    }
}

fn describe(event: &RelayEvent) -> (&'static str, String, String) {
    match event {
        RelayEvent::Connected { id, peer } => (
            "connected",
            id.to_string(),
            format!("peer={}", peer.as_deref().unwrap_or("-")),
        ),
        RelayEvent::Disconnected { id, code } => {
            ("disconnected", id.to_string(), format!("code={code}"))
        }
        RelayEvent::Handshake {
            id,
            source,
            version,
        } => (
            "handshake",
            id.to_string(),
            format!(
                "source={} version={}",
                source.as_deref().unwrap_or("-"),
                version.as_deref().unwrap_or("-")
            ),
        ),
        RelayEvent::Message { id, envelope } => (
            "message",
            id.to_string(),
            format!("type={} {}", envelope.msg_type, payload_preview(envelope)),
        ),
        RelayEvent::DecodeFailed { id, error } => ("decode-failed", id.to_string(), error.clone()),
        RelayEvent::TransportError { id, error } => (
            "transport-error",
            id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            error.clone(),
        ),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    size: usize,
    envelope: &'a Envelope,
    timestamp: String,
}

/// Print a message a client received from the relay.
pub fn print_message(envelope: &Envelope, raw: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&MessageOutput {
            msg_type: &envelope.msg_type,
            size: raw.len(),
            envelope,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => print_row(
            &["TYPE", "SIZE", "SOURCE", "PAYLOAD"],
            vec![
                envelope.msg_type.clone(),
                raw.len().to_string(),
                envelope.source.clone().unwrap_or_else(|| "-".to_string()),
                payload_preview(envelope),
            ],
        ),
        OutputFormat::Pretty => {
            println!(
                "type={} size={} source={} payload={}",
                envelope.msg_type,
                raw.len(),
                envelope.source.as_deref().unwrap_or("-"),
                payload_preview(envelope)
            );
        }
        OutputFormat::Raw => print_raw(raw),
    }
}

fn payload_preview(envelope: &Envelope) -> String {
    match &envelope.payload {
        Some(payload) => payload.to_string(),
        None => "-".to_string(),
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
