//! WebSocket relay and reconnecting client for React Context devtools.
//!
//! Instrumented React apps stream Context/useReducer snapshots to a debugger
//! UI through a small relay; the UI sends actions back the same way.
//!
//! # Crate Structure
//!
//! - [`transport`]: message-oriented sockets (WebSocket, in-process proxy)
//! - [`envelope`]: the JSON envelope and its codec
//! - [`peer`]: connections and the reconnecting client (behind `peer`)
//! - [`relay`]: the broker and its session status (behind `relay`)

/// Re-export transport types.
pub mod transport {
    pub use ctxrelay_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use ctxrelay_envelope::*;
}

/// Re-export connection and client types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ctxrelay_peer::*;
}

/// Re-export relay types (requires `relay` feature).
#[cfg(feature = "relay")]
pub mod relay {
    pub use ctxrelay_relay::*;
}
