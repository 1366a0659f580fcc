//! The abstract port to an LLM provider: a single `think` call decorated
//! with mandatory pre-flight/completion logging and usage accounting.
//!
//! The raw provider call and the logging/accounting wrapper are split
//! deliberately: `LlmProvider` is what a concrete backend implements,
//! `Thinker` (produced by [`ThinkerWrapper`]) is what callers use, and the
//! pre-flight event is guaranteed to be emitted before the provider is
//! dispatched, not after the fact.

mod events;
mod wrapper;

pub use events::{CompleteEvent, NullEventSink, PreflightEvent, ThinkerErrorEvent, ThinkerEventSink};
pub use wrapper::{SessionContext, Thinker, ThinkerWrapper, Turn, UsageAccumulator, UsageSnapshot};

use async_trait::async_trait;

/// A completed provider call, before cost/latency accounting is attached.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// Cost of this call in integer cents, if the provider reports pricing.
    pub cost_cents: Option<u32>,
}

/// What a concrete LLM backend implements. `ThinkerWrapper` adapts this
/// into the logged, accounted-for `Thinker` port callers depend on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;
    fn model(&self) -> &str;
    async fn complete(
        &self,
        transcript: &str,
        session: &SessionContext,
    ) -> anyhow::Result<Completion>;
}

/// Stand-in used when no real LLM provider is configured. Keeps
/// `ThinkerWrapper`'s preflight/error event contract live without a
/// provider credential on hand.
pub struct NullLlmProvider;

#[async_trait]
impl LlmProvider for NullLlmProvider {
    fn provider_id(&self) -> &'static str {
        "null"
    }

    fn model(&self) -> &str {
        "none"
    }

    async fn complete(&self, _transcript: &str, _session: &SessionContext) -> anyhow::Result<Completion> {
        anyhow::bail!("no LLM provider configured")
    }
}
