//! Reply shapes the devtools UI expects for its relay commands.

use std::net::SocketAddr;

use serde::Serialize;

use crate::error::{RelayError, Result};

/// Reply to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<SocketAddr>> for StartReply {
    fn from(result: Result<SocketAddr>) -> Self {
        match result {
            Ok(addr) => Self {
                success: true,
                port: Some(addr.port()),
                error: None,
            },
            Err(err) => Self {
                success: false,
                port: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Reply to a stop request. Stopping cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReply {
    pub success: bool,
}

impl StopReply {
    pub fn done() -> Self {
        Self { success: true }
    }
}

/// Reply to a send-to-all request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReply {
    pub success: bool,
    pub client_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<usize>> for SendReply {
    fn from(result: Result<usize>) -> Self {
        match result {
            Ok(client_count) => Self {
                success: true,
                client_count,
                error: None,
            },
            Err(RelayError::NotRunning) => Self {
                success: false,
                client_count: 0,
                error: Some("server is not running".to_string()),
            },
            Err(err) => Self {
                success: false,
                client_count: 0,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn start_reply_shapes() {
        let ok = StartReply::from(Ok("127.0.0.1:8097".parse().unwrap()));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "port": 8097})
        );

        let failed = StartReply::from(Err(RelayError::Config("port 80".to_string())));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("port 80"));
        assert!(value.get("port").is_none());
    }

    #[test]
    fn send_reply_shapes() {
        assert_eq!(
            serde_json::to_value(SendReply::from(Ok(3))).unwrap(),
            json!({"success": true, "clientCount": 3})
        );
        assert_eq!(
            serde_json::to_value(SendReply::from(Err(RelayError::NotRunning))).unwrap(),
            json!({"success": false, "clientCount": 0, "error": "server is not running"})
        );
    }

    #[test]
    fn stop_reply_always_succeeds() {
        assert_eq!(
            serde_json::to_value(StopReply::done()).unwrap(),
            json!({"success": true})
        );
    }
}
