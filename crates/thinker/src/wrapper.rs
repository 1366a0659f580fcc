use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use uuid::Uuid;

use crate::events::{CompleteEvent, PreflightEvent, ThinkerErrorEvent, ThinkerEventSink};
use crate::LlmProvider;

/// One prior exchange, oldest first. Kept deliberately thin — the thinker
/// port does not own conversation storage, it only reads what the caller
/// hands it.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub history: Vec<Turn>,
}

#[async_trait]
pub trait Thinker: Send + Sync {
    async fn think(&self, transcript: &str, session: &SessionContext) -> anyhow::Result<String>;
}

/// Running totals across every call a `ThinkerWrapper` has dispatched.
/// Mirrors the `{totalCost, requests}` shape a usage-status method reports.
#[derive(Default)]
pub struct UsageAccumulator {
    requests: AtomicU64,
    tokens_in: AtomicU64,
    tokens_out: AtomicU64,
    cost_cents: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_cents: u64,
}

impl UsageAccumulator {
    fn record(&self, tokens_in: u32, tokens_out: u32, cost_cents: Option<u32>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.tokens_in.fetch_add(u64::from(tokens_in), Ordering::Relaxed);
        self.tokens_out.fetch_add(u64::from(tokens_out), Ordering::Relaxed);
        if let Some(cents) = cost_cents {
            self.cost_cents.fetch_add(u64::from(cents), Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            tokens_in: self.tokens_in.load(Ordering::Relaxed),
            tokens_out: self.tokens_out.load(Ordering::Relaxed),
            cost_cents: self.cost_cents.load(Ordering::Relaxed),
        }
    }
}

/// Decorates an [`LlmProvider`] with the mandatory pre-flight/completion
/// logging contract and running usage accounting.
pub struct ThinkerWrapper {
    provider: Arc<dyn LlmProvider>,
    sink: Arc<dyn ThinkerEventSink>,
    usage: UsageAccumulator,
}

impl ThinkerWrapper {
    pub fn new(provider: Arc<dyn LlmProvider>, sink: Arc<dyn ThinkerEventSink>) -> Self {
        Self {
            provider,
            sink,
            usage: UsageAccumulator::default(),
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl Thinker for ThinkerWrapper {
    async fn think(&self, transcript: &str, session: &SessionContext) -> anyhow::Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        self.sink
            .preflight(PreflightEvent {
                request_id: request_id.clone(),
                provider: self.provider.provider_id().to_string(),
                model: self.provider.model().to_string(),
                prompt_size: transcript.len(),
                started_at_ms: now_ms(),
            })
            .await;

        match self.provider.complete(transcript, session).await {
            Ok(completion) => {
                self.usage.record(
                    completion.tokens_in,
                    completion.tokens_out,
                    completion.cost_cents,
                );
                self.sink
                    .complete(CompleteEvent {
                        request_id,
                        latency_ms: started.elapsed().as_millis() as u64,
                        tokens_in: completion.tokens_in,
                        tokens_out: completion.tokens_out,
                        cost_cents: completion.cost_cents,
                        success: true,
                    })
                    .await;
                Ok(completion.text)
            }
            Err(err) => {
                self.sink
                    .error(ThinkerErrorEvent {
                        request_id,
                        error_code: "provider-unavailable".into(),
                        message: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::Completion;

    struct StubProvider {
        reply: String,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn provider_id(&self) -> &'static str {
            "stub"
        }

        fn model(&self) -> &str {
            "stub-model"
        }

        async fn complete(
            &self,
            _transcript: &str,
            _session: &SessionContext,
        ) -> anyhow::Result<Completion> {
            if self.fail {
                anyhow::bail!("provider down");
            }
            Ok(Completion {
                text: self.reply.clone(),
                tokens_in: 10,
                tokens_out: 5,
                cost_cents: Some(2),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ThinkerEventSink for RecordingSink {
        async fn preflight(&self, _event: PreflightEvent) {
            self.events.lock().unwrap().push("preflight");
        }

        async fn complete(&self, _event: CompleteEvent) {
            self.events.lock().unwrap().push("complete");
        }

        async fn error(&self, _event: ThinkerErrorEvent) {
            self.events.lock().unwrap().push("error");
        }
    }

    #[tokio::test]
    async fn preflight_is_emitted_before_complete() {
        let sink = Arc::new(RecordingSink::default());
        let wrapper = ThinkerWrapper::new(
            Arc::new(StubProvider {
                reply: "hi".into(),
                fail: false,
            }),
            sink.clone(),
        );
        let reply = wrapper
            .think("hello", &SessionContext::default())
            .await
            .unwrap();
        assert_eq!(reply, "hi");
        assert_eq!(*sink.events.lock().unwrap(), vec!["preflight", "complete"]);
    }

    #[tokio::test]
    async fn provider_failure_emits_error_not_complete() {
        let sink = Arc::new(RecordingSink::default());
        let wrapper = ThinkerWrapper::new(
            Arc::new(StubProvider {
                reply: String::new(),
                fail: true,
            }),
            sink.clone(),
        );
        let result = wrapper.think("hello", &SessionContext::default()).await;
        assert!(result.is_err());
        assert_eq!(*sink.events.lock().unwrap(), vec!["preflight", "error"]);
    }

    #[tokio::test]
    async fn usage_accumulates_across_calls() {
        let wrapper = ThinkerWrapper::new(
            Arc::new(StubProvider {
                reply: "ok".into(),
                fail: false,
            }),
            Arc::new(crate::events::NullEventSink),
        );
        wrapper
            .think("one", &SessionContext::default())
            .await
            .unwrap();
        wrapper
            .think("two", &SessionContext::default())
            .await
            .unwrap();
        let snapshot = wrapper.usage();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.tokens_in, 20);
        assert_eq!(snapshot.cost_cents, 4);
    }
}
