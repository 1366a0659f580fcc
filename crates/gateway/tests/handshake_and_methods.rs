#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests driving the gateway over a real WebSocket connection,
//! the way a client actually sees it: challenge, hello, then request/response.

use std::net::SocketAddr;
use std::sync::Arc;

use conduit_config::{ConduitConfig, ConfigStore};
use conduit_gateway::devices::DeviceStatus;
use conduit_gateway::server::router;
use conduit_gateway::GatewayState;
use conduit_protocol::{scopes, GatewayFrame, HelloFrame, RequestFrame};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<GatewayState>) {
    let config = Arc::new(ConfigStore::new(ConduitConfig::default()));
    let state = GatewayState::new(config);
    let app = router(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (stream, _) = connect_async(&url).await.unwrap();
    stream
}

async fn recv_frame(stream: &mut WsStream) -> GatewayFrame {
    recv_frame_opt(stream).await.expect("connection closed before expected frame")
}

/// Like `recv_frame`, but tolerates the connection closing (or dropping)
/// without ever sending a frame — the handshake-rejection path races an
/// immediate abort against flushing `hello-err`, so a bare close is as
/// valid a rejection signal as the frame itself.
async fn recv_frame_opt(stream: &mut WsStream) -> Option<GatewayFrame> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return None,
        }
    }
}

async fn send_frame(stream: &mut WsStream, frame: &impl serde::Serialize) {
    let text = serde_json::to_string(frame).unwrap();
    stream.send(Message::Text(text.into())).await.unwrap();
}

/// Connects, completes the challenge/hello handshake as a bootstrapped
/// device, and returns the stream positioned right after `hello-ok`.
async fn handshake(addr: SocketAddr, device_id: &str, requested_scopes: Vec<String>) -> (WsStream, GatewayFrame) {
    let (stream, result) = try_handshake(addr, device_id, requested_scopes).await;
    (stream, result.expect("expected a hello-ok/hello-err frame, got a bare close"))
}

/// Same as `handshake`, but returns `None` in place of the post-hello frame
/// if the connection closes before sending one (see `recv_frame_opt`).
async fn try_handshake(addr: SocketAddr, device_id: &str, requested_scopes: Vec<String>) -> (WsStream, Option<GatewayFrame>) {
    let mut stream = connect(addr).await;
    let challenge = recv_frame(&mut stream).await;
    assert!(matches!(challenge, GatewayFrame::Challenge(_)));

    send_frame(
        &mut stream,
        &HelloFrame {
            r#type: "hello".into(),
            device_id: device_id.into(),
            token: "unused".into(),
            scopes: requested_scopes,
        },
    )
    .await;

    let result = recv_frame_opt(&mut stream).await;
    (stream, result)
}

async fn call(stream: &mut WsStream, id: i64, method: &str, params: serde_json::Value) -> GatewayFrame {
    send_frame(
        stream,
        &RequestFrame {
            id: serde_json::json!(id),
            method: method.into(),
            params: Some(params),
        },
    )
    .await;
    recv_frame(stream).await
}

#[tokio::test]
async fn fresh_connect_reads_config() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("d1", "phone", vec![scopes::CONFIG_READ.to_string()]);

    let (mut stream, hello_ok) = handshake(addr, "d1", vec![scopes::CONFIG_READ.to_string()]).await;
    let GatewayFrame::HelloOk(ok) = hello_ok else { panic!("expected hello-ok, got {hello_ok:?}") };
    assert_eq!(ok.granted_scopes, vec![scopes::CONFIG_READ.to_string()]);

    let response = call(&mut stream, 1, "config.get", serde_json::json!({ "path": "voice.stt" })).await;
    let GatewayFrame::Response(resp) = response else { panic!("expected response, got {response:?}") };
    assert!(resp.error.is_none());
    assert!(resp.result.unwrap().get("provider").is_some());
}

#[tokio::test]
async fn unscoped_write_is_forbidden_and_does_not_change_config() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("d1", "phone", vec![scopes::CONFIG_READ.to_string()]);

    let (mut stream, _) = handshake(addr, "d1", vec![scopes::CONFIG_READ.to_string()]).await;

    let response = call(
        &mut stream,
        2,
        "config.patch",
        serde_json::json!({ "path": "voice", "value": {} }),
    )
    .await;
    let GatewayFrame::Response(resp) = response else { panic!("expected response, got {response:?}") };
    let error = resp.error.expect("expected forbidden error");
    assert_eq!(error.code, "forbidden");
}

#[tokio::test]
async fn pending_device_is_rejected_at_handshake() {
    let (addr, state) = start_server().await;
    // `request()` leaves the device Pending; never approved.
    state.devices.write().await.request("unknown-device", None, "ios");

    let (_stream, result) = try_handshake(addr, "unknown-device", vec![scopes::CONFIG_READ.to_string()]).await;
    assert!(!matches!(result, Some(GatewayFrame::HelloOk(_))));
}

#[tokio::test]
async fn revoked_device_is_disconnected_on_next_handshake_attempt() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("d1", "phone", vec![scopes::ADMIN.to_string()]);
    state.devices.write().await.revoke("d1").unwrap();

    let (_stream, result) = try_handshake(addr, "d1", vec![scopes::ADMIN.to_string()]).await;
    assert!(!matches!(result, Some(GatewayFrame::HelloOk(_))));
}

#[tokio::test]
async fn device_pair_revoke_closes_the_live_connection() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("d1", "phone", vec![scopes::CONFIG_READ.to_string()]);
    state
        .devices
        .write()
        .await
        .bootstrap("admin", "cli", vec![scopes::ADMIN.to_string()]);

    let (mut victim, _) = handshake(addr, "d1", vec![scopes::CONFIG_READ.to_string()]).await;
    let (mut admin, _) = handshake(addr, "admin", vec![scopes::ADMIN.to_string()]).await;

    let response = call(
        &mut admin,
        1,
        "device.pair.revoke",
        serde_json::json!({ "deviceId": "d1" }),
    )
    .await;
    let GatewayFrame::Response(resp) = response else { panic!("expected response, got {response:?}") };
    assert!(resp.error.is_none());

    assert_eq!(
        state.devices.read().await.get("d1").map(|d| d.status),
        Some(DeviceStatus::Revoked)
    );

    // The victim's connection is forcibly closed rather than merely left open:
    // either a clean close frame, a read error from the abrupt drop, or end of stream.
    let next = victim.next().await;
    assert!(!matches!(next, Some(Ok(Message::Text(_) | Message::Binary(_)))));
}

#[tokio::test]
async fn pairing_approve_registers_a_paired_device() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("admin", "cli", vec![scopes::ADMIN.to_string()]);

    let code = state.pairing.write().await.issue("whatsapp", "+999").code;

    let (mut stream, _) = handshake(addr, "admin", vec![scopes::ADMIN.to_string()]).await;
    let response = call(
        &mut stream,
        1,
        "pairing.approve",
        serde_json::json!({ "channel": "whatsapp", "code": code }),
    )
    .await;
    let GatewayFrame::Response(resp) = response else { panic!("expected response, got {response:?}") };
    assert!(resp.error.is_none());
    let device_id = resp.result.unwrap()["deviceId"].as_str().unwrap().to_string();

    assert_eq!(
        state.devices.read().await.get(&device_id).map(|d| d.status),
        Some(DeviceStatus::Approved)
    );
    assert!(state.pairing.read().await.is_paired("whatsapp", "+999"));
}

#[tokio::test]
async fn unknown_method_is_not_found() {
    let (addr, state) = start_server().await;
    state.devices.write().await.bootstrap("d1", "phone", vec![scopes::ADMIN.to_string()]);

    let (mut stream, _) = handshake(addr, "d1", vec![scopes::ADMIN.to_string()]).await;
    let response = call(&mut stream, 1, "nonexistent.method", serde_json::json!({})).await;
    let GatewayFrame::Response(resp) = response else { panic!("expected response, got {response:?}") };
    assert_eq!(resp.error.unwrap().code, "not-found");
}
