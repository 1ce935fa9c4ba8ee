mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ctxrelay", version, about = "React Context devtools relay")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true, env = "CTXRELAY_FORMAT")]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        global = true,
        env = "CTXRELAY_LOG_FORMAT"
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        global = true,
        env = "CTXRELAY_LOG_LEVEL"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_defaults() {
        let cli = Cli::try_parse_from(["ctxrelay", "serve"]).expect("serve should parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 8097);
        assert!(!args.require_handshake);
    }

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ctxrelay",
            "send",
            "8097",
            "--type",
            "action-dispatch",
            "--json",
            "{\"debugId\":\"a\"}",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ctxrelay",
            "send",
            "8097",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn envelope_conflicts_with_type() {
        let err = Cli::try_parse_from([
            "ctxrelay",
            "send",
            "8097",
            "--envelope",
            "{\"type\":\"x\"}",
            "--type",
            "y",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_connect_with_backoff() {
        let cli = Cli::try_parse_from([
            "ctxrelay",
            "connect",
            "ws://127.0.0.1:8097",
            "--retries",
            "3",
            "--backoff",
            "exponential",
            "--legacy",
        ])
        .expect("connect args should parse");
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(args.retries, 3);
        assert!(args.legacy);
    }

    #[test]
    fn parses_info_subcommand() {
        let cli = Cli::try_parse_from(["ctxrelay", "info", "8097", "--timeout", "3s"])
            .expect("info args should parse");
        assert!(matches!(cli.command, Command::Info(_)));
    }
}
