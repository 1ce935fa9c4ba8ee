//! WebSocket relay for React Context devtools.
//!
//! A [`Relay`] accepts connections from instrumented apps and debugger UIs,
//! answers their handshakes, and forwards every other envelope to all other
//! connected peers byte-for-byte. Its [`SessionStatus`] is recomputed on
//! every membership change and published through a watch channel.
//!
//! ```no_run
//! use ctxrelay_relay::{Relay, RelayConfig, DEFAULT_PORT};
//!
//! # async fn run() -> Result<(), ctxrelay_relay::RelayError> {
//! let mut relay = Relay::new(RelayConfig::default())?;
//! relay.start(DEFAULT_PORT).await?;
//! let mut status = relay.subscribe_status();
//! status.changed().await.ok();
//! println!("{} client(s)", status.borrow().client_count);
//! relay.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod config;
pub mod error;
pub mod registry;
pub mod relay;
pub mod status;

pub use boundary::{SendReply, StartReply, StopReply};
pub use config::{
    validate_port, RelayConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_PORT, DEFAULT_UPGRADE_TIMEOUT,
    MIN_PORT,
};
pub use error::{RelayError, Result};
pub use registry::{ClientInfo, Entry, Registry};
pub use relay::{Relay, RelayEvent};
pub use status::{compute_status, SessionStatus};
