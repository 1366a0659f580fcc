//! Per-connection lifecycle: `challenge` -> `hello` -> `hello-ok`/`hello-err`
//! handshake, the request/response message loop, and cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use conduit_protocol::{
    error_codes, roles, scopes, ChallengeFrame, ErrorShape, GatewayFrame, HelloErrFrame, HelloFrame, HelloOkFrame,
    ResponseFrame, MAX_PAYLOAD_BYTES,
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conduit_common::hooks::{HookAction, HookPayload};

use crate::broadcast::{self, BroadcastOpts, OutboundQueue, QueuedFrame};
use crate::devices::DeviceStatus;
use crate::hook_dispatch;
use crate::methods::{MethodContext, MethodRegistry};
use crate::nodes::NodeSession;
use crate::state::{ConnectedClient, GatewayState, SessionPhase};

pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id, %remote_addr, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let queue = OutboundQueue::new(crate::broadcast::OUTBOUND_QUEUE_CAPACITY);

    let write_queue = Arc::clone(&queue);
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = write_queue.recv().await {
            if ws_tx.send(Message::Text(frame.json.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    let handshake_timeout = Duration::from_millis(conduit_protocol::HANDSHAKE_TIMEOUT_MS);
    let outcome = tokio::time::timeout(handshake_timeout, run_handshake(&mut ws_rx, &queue, &state)).await;

    let (device_id, role, granted_scopes) = match outcome {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(reason)) => {
            send_hello_err(&queue, &reason).await;
            queue.close();
            write_handle.abort();
            return;
        }
        Err(_) => {
            warn!(conn_id, "ws: handshake timeout");
            send_hello_err(&queue, "handshake timeout").await;
            queue.close();
            write_handle.abort();
            return;
        }
    };

    info!(conn_id, device_id, role, "ws: handshake complete");

    let now = Instant::now();
    let cancel = CancellationToken::new();
    let client = ConnectedClient {
        conn_id: conn_id.clone(),
        device_id: Some(device_id.clone()),
        role: role.clone(),
        scopes: granted_scopes.clone(),
        phase: SessionPhase::Authenticated,
        challenge_nonce: String::new(),
        queue: Arc::clone(&queue),
        connected_at: now,
        last_activity: now,
        cancel: cancel.clone(),
        subscriptions: tokio::sync::RwLock::new(None),
    };
    state.register_client(client).await;
    hook_dispatch::fire(
        &state,
        HookPayload::SessionStart {
            session_id: conn_id.clone(),
        },
    )
    .await;

    if role == roles::NODE {
        state.nodes.write().await.register(NodeSession {
            node_id: device_id.clone(),
            conn_id: conn_id.clone(),
            display_name: None,
            platform: "unknown".into(),
            connected_at: now,
        });
        broadcast::broadcast(
            &state,
            conduit_protocol::events::CHANNEL_STATUS,
            serde_json::json!({ "type": "node.connected", "nodeId": device_id }),
            BroadcastOpts::default(),
        )
        .await;
    }

    message_loop(&mut ws_rx, &conn_id, &role, &granted_scopes, &state, &methods, &cancel).await;

    hook_dispatch::fire(
        &state,
        HookPayload::SessionEnd {
            session_id: conn_id.clone(),
        },
    )
    .await;

    let removed_node = state.nodes.write().await.unregister_by_conn(&conn_id);
    if let Some(node) = removed_node {
        broadcast::broadcast(
            &state,
            conduit_protocol::events::CHANNEL_STATUS,
            serde_json::json!({ "type": "node.disconnected", "nodeId": node.node_id }),
            BroadcastOpts::default(),
        )
        .await;
    }

    let duration = state
        .remove_client(&conn_id)
        .await
        .map(|c| c.connected_at.elapsed())
        .unwrap_or_default();
    info!(conn_id, duration_secs = duration.as_secs(), "ws: connection closed");

    queue.close();
    write_handle.abort();
}

/// Send the challenge, wait for the client's `hello`, and resolve it against
/// the device registry. Returns `(deviceId, role, grantedScopes)` on
/// success, or a human-readable reason on rejection — the caller turns
/// either outcome into the right frame.
async fn run_handshake(
    ws_rx: &mut SplitStream<WebSocket>,
    queue: &Arc<OutboundQueue>,
    state: &Arc<GatewayState>,
) -> Result<(String, String, Vec<String>), String> {
    let nonce = uuid::Uuid::new_v4().to_string();
    send_frame(queue, &ChallengeFrame::new(nonce), true).await;

    let hello = wait_for_hello(ws_rx).await?;

    let device = state.devices.write().await.request(&hello.device_id, None, "unknown");
    match device.status {
        DeviceStatus::Pending => return Err("device pending approval".into()),
        DeviceStatus::Revoked => return Err("device access revoked".into()),
        DeviceStatus::Approved => {}
    }

    let granted: Vec<String> = hello
        .scopes
        .iter()
        .filter(|s| device.scopes.iter().any(|granted| granted == *s))
        .cloned()
        .collect();

    let role = if device.scopes.iter().any(|s| s == scopes::ADMIN) {
        roles::ADMIN
    } else if granted.iter().any(|s| s == scopes::NODE_READ) {
        roles::NODE
    } else {
        roles::OBSERVER
    }
    .to_string();

    send_frame(queue, &HelloOkFrame::new(role.clone(), granted.clone()), true).await;
    Ok((hello.device_id, role, granted))
}

async fn wait_for_hello(ws_rx: &mut SplitStream<WebSocket>) -> Result<HelloFrame, String> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg.map_err(|e| e.to_string())? {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => return Err("connection closed before hello".into()),
            _ => continue,
        };
        let frame: GatewayFrame = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        return match frame {
            GatewayFrame::Hello(hello) => Ok(hello),
            _ => Err("first message must be 'hello'".into()),
        };
    }
    Err("connection closed before hello".into())
}

async fn message_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    conn_id: &str,
    role: &str,
    scopes: &[String],
    state: &Arc<GatewayState>,
    methods: &Arc<MethodRegistry>,
    cancel: &CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => {
                info!(conn_id, "ws: connection cancelled (device revoked)");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(conn_id, %err, "ws: read error");
                break;
            }
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id, size = text.len(), "ws: payload too large");
            continue;
        }

        let frame: GatewayFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(err) => {
                warn!(conn_id, %err, "ws: invalid frame");
                continue;
            }
        };

        if let Some(client) = state.clients.write().await.get_mut(conn_id) {
            client.touch();
        }

        let GatewayFrame::Request(req) = frame else {
            debug!(conn_id, "ws: ignoring non-request frame");
            continue;
        };

        let method_name = req.method.clone();
        let before = hook_dispatch::fire(
            state,
            HookPayload::CommandBefore {
                session_id: conn_id.to_string(),
                command: method_name.clone(),
            },
        )
        .await;

        let response = if let HookAction::Block(reason) = before {
            info!(conn_id, method = %method_name, reason = %reason, "ws: command blocked by hook");
            ResponseFrame::err(req.id.clone(), ErrorShape::new(error_codes::FORBIDDEN, reason))
        } else {
            let ctx = MethodContext {
                request_id: req.id.clone(),
                method: req.method.clone(),
                params: req.params.unwrap_or(serde_json::Value::Null),
                client_conn_id: conn_id.to_string(),
                client_role: role.to_string(),
                client_scopes: scopes.to_vec(),
                state: Arc::clone(state),
            };
            methods.dispatch(ctx).await
        };

        hook_dispatch::fire(
            state,
            HookPayload::CommandAfter {
                session_id: conn_id.to_string(),
                command: method_name,
                success: response.error.is_none(),
            },
        )
        .await;

        if let Some(client) = state.clients.read().await.get(conn_id) {
            let json = match serde_json::to_string(&response) {
                Ok(j) => j,
                Err(err) => {
                    warn!(%err, "failed to serialize response");
                    continue;
                }
            };
            if client.queue.push(QueuedFrame { json, critical: true }).await == broadcast::PushOutcome::CloseSlowClient {
                warn!(conn_id, "slow client; closing connection");
                client.queue.close();
            }
        }
    }
}

async fn send_frame(queue: &Arc<OutboundQueue>, frame: &impl serde::Serialize, critical: bool) {
    if let Ok(json) = serde_json::to_string(frame) {
        queue.push(QueuedFrame { json, critical }).await;
    }
}

async fn send_hello_err(queue: &Arc<OutboundQueue>, reason: &str) {
    send_frame(queue, &HelloErrFrame::new(reason), true).await;
}
