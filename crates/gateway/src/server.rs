//! Router assembly and process bind/serve, trimmed to what this gateway
//! exposes: a `/ws` control-plane upgrade and a `/health` probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::methods::MethodRegistry;
use crate::state::GatewayState;
use crate::ws::handle_connection;

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    let app_state = AppState {
        gateway: state,
        methods: Arc::new(MethodRegistry::new()),
    };
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

/// Bind `bind:port` and serve until the process is signaled to stop.
pub async fn serve(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("failed to bind {addr}: {err}"))?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, state.methods, addr))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.gateway.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "protocol": conduit_protocol::PROTOCOL_VERSION,
        "connections": count,
    }))
}
