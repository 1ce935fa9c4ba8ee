use serde::Serialize;

use crate::registry::Registry;

/// Session status as the devtools UI consumes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// At least one peer is registered.
    pub connected: bool,
    pub client_count: usize,
    /// Port of the running listener; `None` while stopped.
    pub port: Option<u16>,
    /// Most recent bind or transport error.
    pub last_error: Option<String>,
    pub running: bool,
}

/// Derive the published status from relay state. Pure.
pub fn compute_status(
    registry: &Registry,
    port: Option<u16>,
    last_error: Option<&str>,
    running: bool,
) -> SessionStatus {
    let client_count = registry.len();
    SessionStatus {
        connected: client_count > 0,
        client_count,
        port,
        last_error: last_error.map(str::to_string),
        running,
    }
}
