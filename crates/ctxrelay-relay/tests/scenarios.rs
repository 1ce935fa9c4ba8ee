//! End-to-end relay behavior over real WebSocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use ctxrelay_envelope::Envelope;
use ctxrelay_peer::{ClientConfig, ClientEvent, ClientState, ReconnectingClient};
use ctxrelay_relay::{Relay, RelayConfig, RelayError};
use ctxrelay_transport::WsDialer;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (Relay, SocketAddr) {
    let mut relay = Relay::new(RelayConfig::default()).expect("default config is valid");
    let addr = relay
        .start_at("127.0.0.1:0".parse().unwrap())
        .await
        .expect("relay should bind an ephemeral port");
    (relay, addr)
}

async fn connect(relay: &Relay, addr: SocketAddr) -> Ws {
    let before = relay.status().client_count;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("websocket connect");
    wait_for_count(relay, before + 1).await;
    ws
}

async fn wait_for_count(relay: &Relay, count: usize) {
    let mut status = relay.subscribe_status();
    tokio::time::timeout(WAIT, status.wait_for(|s| s.client_count == count))
        .await
        .expect("client count should settle")
        .expect("relay status channel open");
}

async fn next_text(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("message should arrive")
            .expect("stream open")
            .expect("websocket message");
        match msg {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text, got {other:?}"),
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected message: {next:?}");
}

#[tokio::test]
async fn legacy_handshake_gets_connected_reply() {
    let (relay, addr) = start_relay().await;
    let mut ext = connect(&relay, addr).await;

    ext.send(Message::Text(
        json!({
            "type": "react-context-devtool-handshake",
            "source": "react-context-devtool-extension",
            "version": "4.4",
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let reply: Value = serde_json::from_str(&next_text(&mut ext).await).unwrap();
    assert_eq!(reply["type"], "handshake-response");
    assert_eq!(reply["status"], "connected");
    assert!(reply["message"].is_string());
    assert_eq!(relay.status().client_count, 1);
}

#[tokio::test]
async fn producer_data_reaches_consumers_verbatim() {
    let (relay, addr) = start_relay().await;
    let mut producer = connect(&relay, addr).await;
    let mut ui_one = connect(&relay, addr).await;
    let mut ui_two = connect(&relay, addr).await;

    let text = r#"{"type":"react-context-devtool-data","payload":{"contexts":{"Theme":"dark"}},"tabId":7}"#;
    producer.send(Message::Text(text.to_string())).await.unwrap();

    assert_eq!(next_text(&mut ui_one).await, text);
    assert_eq!(next_text(&mut ui_two).await, text);
    assert_silent(&mut producer).await;
}

#[tokio::test]
async fn dispatch_flows_back_to_producer() {
    let (relay, addr) = start_relay().await;
    let mut producer = connect(&relay, addr).await;
    let mut ui = connect(&relay, addr).await;

    let action = Envelope::action_dispatch("ctx-1", json!({"type": "toggle"}));
    ui.send(Message::Text(serde_json::to_string(&action).unwrap()))
        .await
        .unwrap();

    let received: Envelope = serde_json::from_str(&next_text(&mut producer).await).unwrap();
    assert_eq!(received, action);
}

#[tokio::test]
async fn binary_json_frames_are_accepted() {
    let (relay, addr) = start_relay().await;
    let mut producer = connect(&relay, addr).await;
    let mut ui = connect(&relay, addr).await;

    producer
        .send(Message::Binary(br#"{"type":"context-data","payload":1}"#.to_vec()))
        .await
        .unwrap();
    let forwarded: Value = serde_json::from_str(&next_text(&mut ui).await).unwrap();
    assert_eq!(forwarded["payload"], 1);
}

#[tokio::test]
async fn malformed_json_does_not_drop_the_peer() {
    let (relay, addr) = start_relay().await;
    let mut producer = connect(&relay, addr).await;
    let mut ui = connect(&relay, addr).await;

    producer
        .send(Message::Text("{\"type\":".to_string()))
        .await
        .unwrap();
    producer
        .send(Message::Text(r#"{"type":"context-data","payload":"after"}"#.to_string()))
        .await
        .unwrap();

    let forwarded: Value = serde_json::from_str(&next_text(&mut ui).await).unwrap();
    assert_eq!(forwarded["payload"], "after");
    assert_eq!(relay.status().client_count, 2);
}

#[tokio::test]
async fn client_count_follows_connects_and_closes() {
    let (relay, addr) = start_relay().await;
    let mut a = connect(&relay, addr).await;
    let _b = connect(&relay, addr).await;
    let _c = connect(&relay, addr).await;
    assert!(relay.status().connected);
    assert_eq!(relay.clients().await.unwrap().len(), 3);

    a.close(None).await.unwrap();
    wait_for_count(&relay, 2).await;
    assert_eq!(relay.clients().await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_relay_on_same_port_fails_to_bind() {
    let (first, addr) = start_relay().await;

    let mut second = Relay::new(RelayConfig::default()).unwrap();
    let err = second.start(addr.port()).await.err().unwrap();
    assert!(matches!(err, RelayError::Bind { .. }));

    let status = second.status();
    assert!(!status.running);
    assert!(status.last_error.is_some());
    assert!(first.is_running());
}

#[tokio::test]
async fn stop_closes_clients_normally_and_is_idempotent() {
    let (mut relay, addr) = start_relay().await;
    let mut ws = connect(&relay, addr).await;

    relay.stop().await;
    relay.stop().await;

    let frame = loop {
        match tokio::time::timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    };
    assert_eq!(frame.map(|f| u16::from(f.code)), Some(1000));
    assert_eq!(relay.status().client_count, 0);
    assert!(!relay.status().running);
}

#[tokio::test]
async fn reconnecting_client_session_through_relay() {
    let (mut relay, addr) = start_relay().await;
    let mut ui = connect(&relay, addr).await;

    let (client, mut events) =
        ReconnectingClient::spawn(WsDialer, ClientConfig::default()).unwrap();
    client.connect(addr.to_string()).await.unwrap();
    client.wait_open().await.unwrap();
    wait_for_count(&relay, 2).await;

    loop {
        match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            ClientEvent::HandshakeResponse(response) => {
                assert!(response.is_connected());
                break;
            }
            _ => continue,
        }
    }
    assert_silent(&mut ui).await;

    assert!(client
        .send(Envelope::context_data(json!({"Counter": 3})))
        .await
        .unwrap());
    let forwarded: Value = serde_json::from_str(&next_text(&mut ui).await).unwrap();
    assert_eq!(forwarded["payload"]["Counter"], 3);

    relay.stop().await;
    loop {
        match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            ClientEvent::StateChanged(ClientState::Idle) => break,
            ClientEvent::ReconnectScheduled { .. } => panic!("normal close must not retry"),
            _ => continue,
        }
    }
}
