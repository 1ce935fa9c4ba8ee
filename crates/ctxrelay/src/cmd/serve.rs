use ctxrelay_relay::{Relay, RelayConfig, RelayEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{relay_error, CliResult, SUCCESS};
use crate::output::{print_relay_event, print_status, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let handshake_timeout = args
        .handshake_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let config = RelayConfig {
        host: args.host,
        require_handshake: args.require_handshake,
        handshake_timeout,
        ..RelayConfig::default()
    };
    let mut relay = Relay::new(config).map_err(|err| relay_error("invalid relay config", err))?;

    let mut events = relay.subscribe_events();
    let addr = relay
        .start(args.port)
        .await
        .map_err(|err| relay_error("start failed", err))?;
    info!(%addr, "relay listening");
    print_status(&relay.status(), format);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut relayed = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_relay_event(&event, format);
                    if matches!(event, RelayEvent::Message { .. }) {
                        relayed = relayed.saturating_add(1);
                        if args.count.is_some_and(|count| relayed >= count) {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    relay.stop().await;
    info!("relay stopped");
    Ok(SUCCESS)
}
