//! Events a `ThinkerWrapper` emits around every provider call. Defined as a
//! sink trait, not a direct bus dependency, so this crate never needs to
//! know about `conduit-gateway`'s event bus (the gateway implements the
//! sink and injects it at construction, the same inversion used by
//! `conduit-channels::ChannelBusSink`).

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct PreflightEvent {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_size: usize,
    pub started_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CompleteEvent {
    pub request_id: String,
    pub latency_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_cents: Option<u32>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct ThinkerErrorEvent {
    pub request_id: String,
    pub error_code: String,
    pub message: String,
}

#[async_trait]
pub trait ThinkerEventSink: Send + Sync {
    /// Must be delivered before the provider call is dispatched — this
    /// ordering is load-bearing: observers need to see the attempt even if
    /// the provider call never returns.
    async fn preflight(&self, event: PreflightEvent);
    async fn complete(&self, event: CompleteEvent);
    async fn error(&self, event: ThinkerErrorEvent);
}

/// Sink that drops every event. Useful for tests and for running the
/// thinker standalone without a gateway event bus attached.
#[derive(Default)]
pub struct NullEventSink;

#[async_trait]
impl ThinkerEventSink for NullEventSink {
    async fn preflight(&self, _event: PreflightEvent) {}
    async fn complete(&self, _event: CompleteEvent) {}
    async fn error(&self, _event: ThinkerErrorEvent) {}
}
