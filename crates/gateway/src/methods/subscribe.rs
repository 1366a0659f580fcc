//! `subscribe` — per-connection topic filtering for pushed events.
//!
//! Before a connection calls this, it receives every event its scopes
//! allow (the historical behavior). Once it subscribes, only the named
//! topics are delivered; critical events still bypass the filter, the
//! same way they bypass backpressure drops.

use conduit_protocol::{error_codes, ErrorShape};
use serde_json::json;

use super::{MethodContext, MethodResult};

pub async fn subscribe(ctx: MethodContext) -> MethodResult {
    let topics: Vec<String> = ctx
        .params
        .get("topics")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"topics\" array"))?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    if topics.is_empty() {
        return Err(ErrorShape::new(error_codes::BAD_REQUEST, "\"topics\" must not be empty"));
    }

    let clients = ctx.state.clients.read().await;
    let Some(client) = clients.get(&ctx.client_conn_id) else {
        return Err(ErrorShape::new(error_codes::NOT_FOUND, "connection no longer registered"));
    };
    *client.subscriptions.write().await = Some(topics.iter().cloned().collect());

    Ok(json!({ "topics": topics }))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ConnectedClient, GatewayState, SessionPhase};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    async fn state_with_client(conn_id: &str) -> Arc<GatewayState> {
        let config = Arc::new(conduit_config::ConfigStore::new(conduit_config::ConduitConfig::default()));
        let state = GatewayState::new(config);
        let now = Instant::now();
        state
            .register_client(ConnectedClient {
                conn_id: conn_id.to_string(),
                device_id: Some("dev".into()),
                role: "observer".into(),
                scopes: vec![],
                phase: SessionPhase::Authenticated,
                challenge_nonce: String::new(),
                queue: crate::broadcast::OutboundQueue::new(crate::broadcast::OUTBOUND_QUEUE_CAPACITY),
                connected_at: now,
                last_activity: now,
                cancel: CancellationToken::new(),
                subscriptions: tokio::sync::RwLock::new(None),
            })
            .await;
        state
    }

    #[tokio::test]
    async fn subscribe_records_topics_on_the_connection() {
        let state = state_with_client("c1").await;
        let ctx = MethodContext {
            request_id: json!(1),
            method: "subscribe".into(),
            params: json!({ "topics": ["config:changed", "hook:fired"] }),
            client_conn_id: "c1".into(),
            client_role: "observer".into(),
            client_scopes: vec![],
            state: Arc::clone(&state),
        };
        subscribe(ctx).await.unwrap();
        let clients = state.clients.read().await;
        let subs = clients.get("c1").unwrap().subscriptions.read().await;
        assert_eq!(subs.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_topics() {
        let state = state_with_client("c1").await;
        let ctx = MethodContext {
            request_id: json!(1),
            method: "subscribe".into(),
            params: json!({ "topics": [] }),
            client_conn_id: "c1".into(),
            client_role: "observer".into(),
            client_scopes: vec![],
            state: Arc::clone(&state),
        };
        assert!(subscribe(ctx).await.is_err());
    }
}
