//! Bridges `conduit-channels`' adapter-facing bus trait onto the gateway's
//! event bus, hook engine, and Thinker, without `conduit-channels` depending
//! on any of them directly.
//!
//! `publish_inbound` carries the full inbound data flow: an admitted item
//! fires `message:before`, goes to the Thinker, the reply fires
//! `message:after`, and is sent back through the same adapter. A hook that
//! blocks the turn stops short of calling the Thinker or sending a reply.

use std::sync::Weak;

use async_trait::async_trait;
use conduit_channels::{AdapterState, ChannelBusSink, InboundItem, OutboundPayload};
use conduit_common::hooks::{HookAction, HookPayload};
use conduit_protocol::events;
use conduit_thinker::Thinker as _;
use serde_json::json;
use tracing::warn;

use crate::broadcast::{self, BroadcastOpts};
use crate::hook_dispatch;
use crate::state::GatewayState;

pub struct GatewayChannelBusSink {
    pub state: Weak<GatewayState>,
}

#[async_trait]
impl ChannelBusSink for GatewayChannelBusSink {
    async fn publish_inbound(&self, channel: &str, item: InboundItem) {
        let Some(state) = self.state.upgrade() else { return };
        let session_id = format!("channel:{channel}:{}", item.sender);

        let before = hook_dispatch::fire(
            &state,
            HookPayload::MessageBefore {
                session_id: session_id.clone(),
                channel: Some(channel.to_string()),
                text: item.text.clone(),
            },
        )
        .await;

        if let HookAction::Block(reason) = before {
            warn!(channel, sender = %item.sender, reason = %reason, "inbound message blocked by hook");
            return;
        }

        let Some(thinker) = state.thinker.read().await.clone() else {
            warn!(channel, "inbound message dropped: no thinker configured");
            return;
        };

        let ctx = conduit_thinker::SessionContext {
            session_id: session_id.clone(),
            history: Vec::new(),
        };

        let reply = match thinker.think(&item.text, &ctx).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(channel, sender = %item.sender, error = %err, "thinker call failed for inbound message");
                return;
            },
        };

        hook_dispatch::fire(
            &state,
            HookPayload::MessageAfter {
                session_id,
                channel: Some(channel.to_string()),
                reply: reply.clone(),
            },
        )
        .await;

        let manager = state.channels.read().await.clone();
        if let Some(manager) = manager {
            if let Err(err) = manager.send(channel, &item.sender, &OutboundPayload::text(reply)).await {
                warn!(channel, sender = %item.sender, error = %err, "failed to send channel reply");
            }
        }
    }

    async fn publish_status(&self, channel: &str, adapter_state: AdapterState) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::CHANNEL_STATUS,
            json!({ "channel": channel, "state": format!("{adapter_state:?}").to_lowercase() }),
            BroadcastOpts::default(),
        )
        .await;
    }

    async fn publish_pairing_requested(&self, channel: &str, sender: &str, code: &str) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::PAIRING_REQUESTED,
            json!({ "channel": channel, "sender": sender, "code": code }),
            BroadcastOpts::default(),
        )
        .await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_state_makes_every_publish_a_no_op() {
        let sink = GatewayChannelBusSink { state: Weak::new() };
        sink.publish_status("telegram", AdapterState::Connected).await;
        sink.publish_pairing_requested("telegram", "+1", "ABCD1234").await;
        sink.publish_inbound(
            "telegram",
            InboundItem {
                sender: "+1".to_string(),
                text: "hi".to_string(),
                media_refs: Vec::new(),
                timestamp_ms: 0,
            },
        )
        .await;
    }
}
