//! Bridges `conduit-thinker` and `conduit-voice`'s narrower traits onto the
//! gateway's event bus and state, without either of those crates depending
//! on this one.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use conduit_protocol::events;
use conduit_thinker::Thinker as _;
use serde_json::json;

use crate::broadcast::{self, BroadcastOpts};
use crate::state::GatewayState;

/// Adapts `conduit_thinker::Thinker` (session-aware) to the simpler,
/// transcript-only `conduit_voice::pipeline::Thinker` the voice pipeline
/// depends on. Voice turns don't carry multi-turn history today, so each
/// call gets a fresh, empty `SessionContext`.
pub struct ThinkerAdapter {
    pub inner: Arc<dyn conduit_thinker::Thinker>,
}

#[async_trait]
impl conduit_voice::Thinker for ThinkerAdapter {
    async fn think(&self, transcript: &str) -> anyhow::Result<String> {
        let ctx = conduit_thinker::SessionContext {
            session_id: "voice".to_string(),
            history: Vec::new(),
        };
        self.inner.think(transcript, &ctx).await
    }
}

/// Publishes `thinker:preflight` / `thinker:complete` events onto the
/// gateway bus. Holds only a `Weak` reference to the state so a running
/// pipeline never keeps the gateway alive past its last client.
pub struct GatewayThinkerEventSink {
    pub state: Weak<GatewayState>,
}

#[async_trait]
impl conduit_thinker::ThinkerEventSink for GatewayThinkerEventSink {
    async fn preflight(&self, event: conduit_thinker::PreflightEvent) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::THINKER_PREFLIGHT,
            json!({
                "requestId": event.request_id,
                "provider": event.provider,
                "model": event.model,
                "promptSize": event.prompt_size,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }

    async fn complete(&self, event: conduit_thinker::CompleteEvent) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::THINKER_COMPLETE,
            json!({
                "requestId": event.request_id,
                "latencyMs": event.latency_ms,
                "tokensIn": event.tokens_in,
                "tokensOut": event.tokens_out,
                "costCents": event.cost_cents,
                "success": event.success,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }

    async fn error(&self, event: conduit_thinker::ThinkerErrorEvent) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::THINKER_COMPLETE,
            json!({
                "requestId": event.request_id,
                "success": false,
                "errorCode": event.error_code,
                "message": event.message,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }
}

/// Publishes `voice:state` / `voice:transcript` / `voice:error` events onto
/// the gateway bus as the pipeline's state machine runs.
pub struct GatewayVoiceEventSink {
    pub state: Weak<GatewayState>,
}

#[async_trait]
impl conduit_voice::VoiceEventSink for GatewayVoiceEventSink {
    async fn on_state(&self, voice_state: conduit_voice::VoiceState) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::VOICE_STATE,
            json!({ "state": format!("{voice_state:?}").to_lowercase() }),
            BroadcastOpts::default(),
        )
        .await;
    }

    async fn on_transcript(&self, text: Option<String>) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::VOICE_TRANSCRIPT,
            json!({ "text": text }),
            BroadcastOpts::default(),
        )
        .await;
    }

    async fn on_error(&self, message: String) {
        let Some(state) = self.state.upgrade() else { return };
        broadcast::broadcast(
            &state,
            events::VOICE_ERROR,
            json!({ "message": message }),
            BroadcastOpts::default(),
        )
        .await;
    }
}
