//! Hook event model shared by the hook engine (`conduit-gateway::hooks`) and
//! any crate that needs to publish a lifecycle event without depending on the
//! full engine.
//!
//! Hooks subscribe to the *session*, *message*, *command*, and *file*
//! lifecycle events spec'd for the gateway's Hook Engine. Both native
//! (in-process) and shell (external-command) handlers implement
//! [`HookHandler`].

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info, warn},
};

// ── HookEvent ───────────────────────────────────────────────────────────────

/// Lifecycle events that hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    MessageBefore,
    MessageAfter,
    CommandBefore,
    CommandAfter,
    FileBefore,
    FileAfter,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl HookEvent {
    /// All variants, for iteration.
    pub const ALL: &'static [HookEvent] = &[
        Self::SessionStart,
        Self::SessionEnd,
        Self::MessageBefore,
        Self::MessageAfter,
        Self::CommandBefore,
        Self::CommandAfter,
        Self::FileBefore,
        Self::FileAfter,
    ];

    /// Returns true if this event is read-only and handlers can run in parallel.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::SessionStart | Self::SessionEnd | Self::MessageAfter | Self::CommandAfter | Self::FileAfter
        )
    }

    /// Wire name used in config (`hooks.<name>`) and protocol events.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::SessionStart => "session:start",
            Self::SessionEnd => "session:end",
            Self::MessageBefore => "message:before",
            Self::MessageAfter => "message:after",
            Self::CommandBefore => "command:before",
            Self::CommandAfter => "command:after",
            Self::FileBefore => "file:before",
            Self::FileAfter => "file:after",
        }
    }

    /// Parses a config-supplied event name back into its variant.
    pub fn from_wire_name(name: &str) -> Option<HookEvent> {
        Self::ALL.iter().copied().find(|e| e.wire_name() == name)
    }
}

// ── HookPayload ─────────────────────────────────────────────────────────────

/// Typed payload carried with each hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HookPayload {
    SessionStart {
        session_id: String,
    },
    SessionEnd {
        session_id: String,
    },
    MessageBefore {
        session_id: String,
        channel: Option<String>,
        text: String,
    },
    MessageAfter {
        session_id: String,
        channel: Option<String>,
        reply: String,
    },
    CommandBefore {
        session_id: String,
        command: String,
    },
    CommandAfter {
        session_id: String,
        command: String,
        success: bool,
    },
    FileBefore {
        session_id: String,
        path: String,
    },
    FileAfter {
        session_id: String,
        path: String,
        success: bool,
    },
}

impl HookPayload {
    /// Returns the [`HookEvent`] variant that matches this payload.
    pub fn event(&self) -> HookEvent {
        match self {
            Self::SessionStart { .. } => HookEvent::SessionStart,
            Self::SessionEnd { .. } => HookEvent::SessionEnd,
            Self::MessageBefore { .. } => HookEvent::MessageBefore,
            Self::MessageAfter { .. } => HookEvent::MessageAfter,
            Self::CommandBefore { .. } => HookEvent::CommandBefore,
            Self::CommandAfter { .. } => HookEvent::CommandAfter,
            Self::FileBefore { .. } => HookEvent::FileBefore,
            Self::FileAfter { .. } => HookEvent::FileAfter,
        }
    }
}

// ── HookAction ──────────────────────────────────────────────────────────────

/// The outcome a hook handler returns.
#[derive(Debug, Default, Clone)]
pub enum HookAction {
    /// Let the event proceed normally.
    #[default]
    Continue,
    /// Replace part of the payload data.
    ModifyPayload(Value),
    /// Block the action entirely, with a reason string.
    Block(String),
}

// ── Execution history ────────────────────────────────────────────────────────

/// One recorded invocation of a hook, kept in its bounded ring buffer.
#[derive(Debug, Clone)]
pub struct HookExecution {
    pub at: Instant,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// Minimum ring-buffer capacity per hook (data model invariant: capacity ≥10).
pub const HOOK_HISTORY_CAPACITY: usize = 10;

// ── HookHandler trait ───────────────────────────────────────────────────────

/// Trait implemented by both native (in-process) and shell (external-command)
/// hook handlers.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// A human-readable name for this handler.
    fn name(&self) -> &str;

    /// Which events this handler subscribes to.
    fn events(&self) -> &[HookEvent];

    /// Priority for ordering. Higher values run first. Default is 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Handle the event, returning an action that may modify or block the flow.
    async fn handle(&self, event: HookEvent, payload: &HookPayload) -> anyhow::Result<HookAction>;
}

// ── HookStats ───────────────────────────────────────────────────────────────

/// Per-handler health statistics plus bounded execution history, used for
/// circuit-breaker logic and the hook data model's `triggerCount`/
/// `lastTriggered`/history fields.
pub struct HookStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub consecutive_failures: AtomicU64,
    pub total_latency_us: AtomicU64,
    pub disabled: AtomicBool,
    pub disabled_at: std::sync::Mutex<Option<Instant>>,
    pub last_triggered: std::sync::Mutex<Option<Instant>>,
    pub history: std::sync::Mutex<VecDeque<HookExecution>>,
}

impl HookStats {
    pub fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            disabled: AtomicBool::new(false),
            disabled_at: std::sync::Mutex::new(None),
            last_triggered: std::sync::Mutex::new(None),
            history: std::sync::Mutex::new(VecDeque::with_capacity(HOOK_HISTORY_CAPACITY)),
        }
    }

    fn record(&self, latency: Duration, success: bool, error: Option<String>) {
        let now = Instant::now();
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        *self.last_triggered.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= HOOK_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(HookExecution {
            at: now,
            duration: latency,
            success,
            error,
        });
    }

    pub fn record_success(&self, latency: Duration) {
        self.record(latency, true, None);
    }

    pub fn record_failure(&self, latency: Duration, error: impl Into<String>) {
        self.record(latency, false, Some(error.into()));
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }

    pub fn history_snapshot(&self) -> Vec<HookExecution> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for HookStats {
    fn default() -> Self {
        Self::new()
    }
}

// ── Handler entry (with stats) ──────────────────────────────────────────────

struct HandlerEntry {
    handler: Arc<dyn HookHandler>,
    stats: Arc<HookStats>,
}

// ── HookRegistry ────────────────────────────────────────────────────────────

/// Manages registered hook handlers and dispatches events to them.
pub struct HookRegistry {
    handlers: HashMap<HookEvent, Vec<HandlerEntry>>,
    /// Maximum consecutive failures before auto-disabling a handler.
    circuit_breaker_threshold: u64,
    /// Cooldown period before re-enabling a circuit-broken handler.
    circuit_breaker_cooldown: Duration,
    /// When true, Block/Modify results are logged but not applied.
    pub dry_run: bool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            dry_run: false,
        }
    }

    pub fn with_circuit_breaker(mut self, threshold: u64, cooldown: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_cooldown = cooldown;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Register a handler for all events it subscribes to.
    /// Handlers are sorted by priority (descending) within each event.
    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        let stats = Arc::new(HookStats::new());
        for &event in handler.events() {
            let entry = HandlerEntry {
                handler: Arc::clone(&handler),
                stats: Arc::clone(&stats),
            };
            let handlers = self.handlers.entry(event).or_default();
            handlers.push(entry);
            handlers.sort_by_key(|h| std::cmp::Reverse(h.handler.priority()));
        }
        info!(handler = handler.name(), "hook handler registered");
    }

    pub fn has_handlers(&self, event: HookEvent) -> bool {
        self.handlers.get(&event).is_some_and(|v| !v.is_empty())
    }

    pub fn handler_stats(&self, name: &str) -> Option<Arc<HookStats>> {
        for entries in self.handlers.values() {
            for entry in entries {
                if entry.handler.name() == name {
                    return Some(Arc::clone(&entry.stats));
                }
            }
        }
        None
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .values()
            .flatten()
            .map(|e| e.handler.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn check_circuit_breaker(&self, entry: &HandlerEntry) -> bool {
        let is_disabled = entry.stats.disabled.load(Ordering::Relaxed);

        if !is_disabled {
            let consecutive_failures = entry.stats.consecutive_failures.load(Ordering::Relaxed);
            if consecutive_failures >= self.circuit_breaker_threshold {
                entry.stats.disabled.store(true, Ordering::Relaxed);
                *entry.stats.disabled_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                warn!(
                    handler = entry.handler.name(),
                    "hook circuit breaker tripped after {} consecutive failures",
                    self.circuit_breaker_threshold
                );
                return true;
            }
            return false;
        }

        let disabled_at = entry.stats.disabled_at.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *disabled_at
            && at.elapsed() >= self.circuit_breaker_cooldown
        {
            drop(disabled_at);
            entry.stats.disabled.store(false, Ordering::Relaxed);
            entry.stats.consecutive_failures.store(0, Ordering::Relaxed);
            info!(handler = entry.handler.name(), "hook circuit breaker reset after cooldown");
            return false;
        }
        true
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Read-only events dispatch handlers in parallel (Block/Modify are
    /// ignored since the event is informational). Modifying events dispatch
    /// sequentially: the first `Block` short-circuits; the last `Modify`
    /// wins; each handler failure is isolated and never aborts the others.
    pub async fn dispatch(&self, payload: &HookPayload) -> HookAction {
        let event = payload.event();
        let handlers = match self.handlers.get(&event) {
            Some(h) if !h.is_empty() => h,
            _ => return HookAction::Continue,
        };

        debug!(event = %event, count = handlers.len(), "dispatching hook event");

        if event.is_read_only() {
            self.dispatch_parallel(event, payload, handlers).await
        } else {
            self.dispatch_sequential(event, payload, handlers).await
        }
    }

    async fn dispatch_parallel(&self, event: HookEvent, payload: &HookPayload, handlers: &[HandlerEntry]) -> HookAction {
        let mut futures = Vec::new();
        for entry in handlers {
            if self.check_circuit_breaker(entry) {
                continue;
            }
            let handler = Arc::clone(&entry.handler);
            let stats = Arc::clone(&entry.stats);
            let payload = payload.clone();
            futures.push(async move {
                let start = Instant::now();
                let result = handler.handle(event, &payload).await;
                let latency = start.elapsed();
                match &result {
                    Ok(_) => stats.record_success(latency),
                    Err(e) => stats.record_failure(latency, e.to_string()),
                }
                (handler.name().to_string(), result)
            });
        }

        let results = futures::future::join_all(futures).await;
        for (name, result) in results {
            if let Err(e) = result {
                warn!(handler = %name, event = %event, error = %e, "hook handler failed");
            }
        }

        HookAction::Continue
    }

    async fn dispatch_sequential(&self, event: HookEvent, payload: &HookPayload, handlers: &[HandlerEntry]) -> HookAction {
        let mut last_modify: Option<Value> = None;

        for entry in handlers {
            if self.check_circuit_breaker(entry) {
                continue;
            }

            let start = Instant::now();
            let result = entry.handler.handle(event, payload).await;
            let latency = start.elapsed();

            match result {
                Ok(HookAction::Continue) => entry.stats.record_success(latency),
                Ok(HookAction::ModifyPayload(v)) => {
                    entry.stats.record_success(latency);
                    if self.dry_run {
                        info!(handler = entry.handler.name(), event = %event, "hook modify (dry-run, not applied)");
                    } else {
                        last_modify = Some(v);
                    }
                },
                Ok(HookAction::Block(reason)) => {
                    entry.stats.record_success(latency);
                    if self.dry_run {
                        info!(handler = entry.handler.name(), event = %event, reason = %reason, "hook block (dry-run, not applied)");
                    } else {
                        info!(handler = entry.handler.name(), event = %event, reason = %reason, "hook blocked event");
                        return HookAction::Block(reason);
                    }
                },
                Err(e) => {
                    entry.stats.record_failure(latency, e.to_string());
                    warn!(handler = entry.handler.name(), event = %event, error = %e, "hook handler failed");
                },
            }
        }

        match last_modify {
            Some(v) => HookAction::ModifyPayload(v),
            None => HookAction::Continue,
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct PriorityHandler {
        handler_name: String,
        handler_priority: i32,
        subscribed: Vec<HookEvent>,
    }

    #[async_trait]
    impl HookHandler for PriorityHandler {
        fn name(&self) -> &str {
            &self.handler_name
        }

        fn events(&self) -> &[HookEvent] {
            &self.subscribed
        }

        fn priority(&self) -> i32 {
            self.handler_priority
        }

        async fn handle(&self, _event: HookEvent, _payload: &HookPayload) -> anyhow::Result<HookAction> {
            Ok(HookAction::Continue)
        }
    }

    struct BlockingHandler {
        handler_name: String,
        handler_priority: i32,
        subscribed: Vec<HookEvent>,
    }

    #[async_trait]
    impl HookHandler for BlockingHandler {
        fn name(&self) -> &str {
            &self.handler_name
        }

        fn events(&self) -> &[HookEvent] {
            &self.subscribed
        }

        fn priority(&self) -> i32 {
            self.handler_priority
        }

        async fn handle(&self, _event: HookEvent, _payload: &HookPayload) -> anyhow::Result<HookAction> {
            Ok(HookAction::Block(self.handler_name.clone()))
        }
    }

    fn modifying_payload() -> HookPayload {
        HookPayload::CommandBefore {
            session_id: "s1".into(),
            command: "reboot".into(),
        }
    }

    fn read_only_payload() -> HookPayload {
        HookPayload::SessionStart { session_id: "s1".into() }
    }

    #[test]
    fn priority_ordering() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(PriorityHandler {
            handler_name: "low".into(),
            handler_priority: -10,
            subscribed: vec![HookEvent::CommandBefore],
        }));
        registry.register(Arc::new(PriorityHandler {
            handler_name: "high".into(),
            handler_priority: 10,
            subscribed: vec![HookEvent::CommandBefore],
        }));
        let handlers = registry.handlers.get(&HookEvent::CommandBefore).unwrap();
        assert_eq!(handlers[0].handler.name(), "high");
        assert_eq!(handlers[1].handler.name(), "low");
    }

    #[tokio::test]
    async fn higher_priority_block_wins() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(BlockingHandler {
            handler_name: "low-blocker".into(),
            handler_priority: 0,
            subscribed: vec![HookEvent::CommandBefore],
        }));
        registry.register(Arc::new(BlockingHandler {
            handler_name: "high-blocker".into(),
            handler_priority: 10,
            subscribed: vec![HookEvent::CommandBefore],
        }));

        match registry.dispatch(&modifying_payload()).await {
            HookAction::Block(name) => assert_eq!(name, "high-blocker"),
            _ => panic!("expected Block from high-priority handler"),
        }
    }

    #[tokio::test]
    async fn read_only_events_ignore_block() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(BlockingHandler {
            handler_name: "blocker".into(),
            handler_priority: 0,
            subscribed: vec![HookEvent::SessionStart],
        }));

        let result = registry.dispatch(&read_only_payload()).await;
        assert!(matches!(result, HookAction::Continue));
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_failures() {
        struct FailingHandler;

        #[async_trait]
        impl HookHandler for FailingHandler {
            fn name(&self) -> &str {
                "failer"
            }

            fn events(&self) -> &[HookEvent] {
                &[HookEvent::CommandBefore]
            }

            async fn handle(&self, _event: HookEvent, _payload: &HookPayload) -> anyhow::Result<HookAction> {
                anyhow::bail!("always fails")
            }
        }

        let mut registry = HookRegistry::new().with_circuit_breaker(2, Duration::from_millis(100));
        registry.register(Arc::new(FailingHandler));

        let payload = modifying_payload();
        registry.dispatch(&payload).await;
        registry.dispatch(&payload).await;
        registry.dispatch(&payload).await;

        let stats = registry.handler_stats("failer").unwrap();
        assert!(stats.disabled.load(Ordering::Relaxed));
        assert_eq!(stats.history_snapshot().len(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        registry.dispatch(&payload).await;
        assert!(!stats.disabled.load(Ordering::Relaxed));
    }

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(HookEvent::SessionStart.wire_name(), "session:start");
        assert_eq!(HookEvent::MessageBefore.wire_name(), "message:before");
        assert_eq!(HookEvent::FileAfter.wire_name(), "file:after");
    }

    #[test]
    fn from_wire_name_round_trips() {
        for event in HookEvent::ALL {
            assert_eq!(HookEvent::from_wire_name(event.wire_name()), Some(*event));
        }
        assert_eq!(HookEvent::from_wire_name("not:a:real:event"), None);
    }

    #[test]
    fn history_capacity_is_bounded() {
        let stats = HookStats::new();
        for i in 0..(HOOK_HISTORY_CAPACITY * 2) {
            stats.record_success(Duration::from_millis(i as u64));
        }
        assert_eq!(stats.history_snapshot().len(), HOOK_HISTORY_CAPACITY);
    }
}
