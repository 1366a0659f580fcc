//! Bridges the hook engine in `conduit_common::hooks` to gateway event
//! points: a connection's session start/end, and the before/after of every
//! dispatched method call. The channel bridge fires `MessageBefore`/
//! `MessageAfter` the same way once it exists.
//!
//! Also supplies the external-command handler: each configured hook with a
//! `command` runs it via `tokio::process::Command` under a timeout. Since a
//! read-only event's result is never used for anything but logging, those
//! fire into a bounded, coalescing backlog drained by a single background
//! worker, so a slow or wedged command can't pile up concurrent child
//! processes behind a burst of events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_common::hooks::{HookAction, HookEvent, HookHandler, HookPayload, HookRegistry};
use conduit_config::schema::HookConfigEntry;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::warn;

use crate::broadcast::{self, BroadcastOpts};
use crate::state::GatewayState;

/// Default depth of a handler's read-only coalescing backlog.
pub const DEFAULT_COALESCE_DEPTH: usize = 100;

/// Runs a configured external command for every event it subscribes to.
/// Modifying events run the command inline so a nonzero exit can actually
/// block the caller; read-only events enqueue onto a bounded backlog that a
/// single background task drains sequentially, coalescing by dropping the
/// oldest entry once the backlog is full.
pub struct ShellHookHandler {
    name: String,
    events: Vec<HookEvent>,
    command: String,
    args: Vec<String>,
    timeout: Duration,
    coalesce_depth: usize,
    backlog: Mutex<VecDeque<HookPayload>>,
    dropped: AtomicU64,
    notify: Notify,
}

impl ShellHookHandler {
    /// Builds the handler and spawns its backlog-draining worker, returning
    /// it ready to hand to `HookRegistry::register`.
    pub fn spawn(
        name: impl Into<String>,
        events: Vec<HookEvent>,
        command: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Arc<Self> {
        let handler = Arc::new(Self {
            name: name.into(),
            events,
            command: command.into(),
            args,
            timeout,
            coalesce_depth: DEFAULT_COALESCE_DEPTH,
            backlog: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        });
        let worker = Arc::clone(&handler);
        tokio::spawn(async move { worker.drain_loop().await });
        handler
    }

    async fn run_command(&self, payload: &HookPayload) -> anyhow::Result<HookAction> {
        let body = serde_json::to_string(payload)?;
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .env("CONDUIT_HOOK_EVENT", payload.event().wire_name())
            .env("CONDUIT_HOOK_PAYLOAD", body);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("hook command '{}' timed out after {:?}", self.command, self.timeout))??;

        if output.status.success() {
            Ok(HookAction::Continue)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("hook command exited with {}", output.status)
            } else {
                stderr
            };
            Ok(HookAction::Block(reason))
        }
    }

    async fn enqueue(&self, payload: HookPayload) {
        let mut backlog = self.backlog.lock().await;
        if backlog.len() >= self.coalesce_depth {
            backlog.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        backlog.push_back(payload);
        drop(backlog);
        self.notify.notify_one();
    }

    async fn drain_loop(&self) {
        loop {
            self.notify.notified().await;
            loop {
                let next = {
                    let mut backlog = self.backlog.lock().await;
                    backlog.pop_front()
                };
                let Some(payload) = next else { break };
                if let Err(err) = self.run_command(&payload).await {
                    warn!(handler = %self.name, error = %err, "hook command failed");
                }
            }
        }
    }
}

#[async_trait]
impl HookHandler for ShellHookHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn events(&self) -> &[HookEvent] {
        &self.events
    }

    async fn handle(&self, event: HookEvent, payload: &HookPayload) -> anyhow::Result<HookAction> {
        if !event.is_read_only() {
            return self.run_command(payload).await;
        }
        self.enqueue(payload.clone()).await;
        Ok(HookAction::Continue)
    }
}

/// Builds and registers a `ShellHookHandler` for every enabled,
/// command-bearing entry in `hooks`. Entries with no recognized event names
/// or no command are skipped with a warning.
pub async fn register_from_config(registry: &RwLock<HookRegistry>, hooks: &HashMap<String, HookConfigEntry>) {
    let mut registry = registry.write().await;
    for (name, entry) in hooks {
        if !entry.enabled {
            continue;
        }
        let Some(command) = entry.command.clone() else {
            warn!(hook = %name, "hook has no command configured, skipping");
            continue;
        };
        let events: Vec<HookEvent> = entry.events.iter().filter_map(|e| HookEvent::from_wire_name(e)).collect();
        if events.is_empty() {
            warn!(hook = %name, "hook declares no recognized events, skipping");
            continue;
        }
        let timeout = Duration::from_millis(entry.timeout_ms.unwrap_or(conduit_protocol::HOOK_COMMAND_TIMEOUT_MS));
        registry.register(ShellHookHandler::spawn(name.clone(), events, command, entry.args.clone(), timeout));
    }
}

/// Dispatches a lifecycle event through the registered hooks. If any
/// handler subscribes to it, also publishes `hook:fired` so observers can
/// watch hook activity live instead of polling `hooks.list`.
pub async fn fire(state: &Arc<GatewayState>, payload: HookPayload) -> HookAction {
    let event = payload.event();
    let has_handlers = state.hooks.read().await.has_handlers(event);
    let action = state.hooks.read().await.dispatch(&payload).await;
    if has_handlers {
        let outcome = match &action {
            HookAction::Continue => "continue",
            HookAction::ModifyPayload(_) => "modify",
            HookAction::Block(_) => "block",
        };
        broadcast::broadcast(
            state,
            conduit_protocol::events::HOOK_FIRED,
            serde_json::json!({ "event": event.wire_name(), "outcome": outcome }),
            BroadcastOpts::default(),
        )
        .await;
    }
    action
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::hooks::HookRegistry;
    use tokio::sync::RwLock as AsyncRwLock;

    fn entry(command: &str, events: &[&str]) -> HookConfigEntry {
        HookConfigEntry {
            enabled: true,
            events: events.iter().map(|e| e.to_string()).collect(),
            command: Some(command.to_string()),
            args: vec![],
            timeout_ms: Some(200),
            config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn register_from_config_skips_disabled_and_commandless_entries() {
        let registry = AsyncRwLock::new(HookRegistry::new());
        let mut hooks = HashMap::new();
        hooks.insert("disabled".to_string(), {
            let mut e = entry("/bin/true", &["session:start"]);
            e.enabled = false;
            e
        });
        hooks.insert("no-command".to_string(), {
            let mut e = entry("/bin/true", &["session:start"]);
            e.command = None;
            e
        });
        hooks.insert("good".to_string(), entry("/bin/true", &["session:start"]));

        register_from_config(&registry, &hooks).await;

        let names = registry.read().await.handler_names();
        assert_eq!(names, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn register_from_config_skips_unrecognized_events() {
        let registry = AsyncRwLock::new(HookRegistry::new());
        let mut hooks = HashMap::new();
        hooks.insert("bad-events".to_string(), entry("/bin/true", &["not:a:real:event"]));
        register_from_config(&registry, &hooks).await;
        assert!(registry.read().await.handler_names().is_empty());
    }

    #[tokio::test]
    async fn shell_handler_runs_command_and_reports_success() {
        let handler = ShellHookHandler::spawn(
            "echo-test",
            vec![HookEvent::CommandBefore],
            "/bin/true",
            vec![],
            Duration::from_secs(1),
        );
        let payload = HookPayload::CommandBefore {
            session_id: "s1".into(),
            command: "reboot".into(),
        };
        let action = handler.handle(HookEvent::CommandBefore, &payload).await.unwrap();
        assert!(matches!(action, HookAction::Continue));
    }

    #[tokio::test]
    async fn shell_handler_blocks_on_nonzero_exit() {
        let handler =
            ShellHookHandler::spawn("fail-test", vec![HookEvent::CommandBefore], "/bin/false", vec![], Duration::from_secs(1));
        let payload = HookPayload::CommandBefore {
            session_id: "s1".into(),
            command: "reboot".into(),
        };
        let action = handler.handle(HookEvent::CommandBefore, &payload).await.unwrap();
        assert!(matches!(action, HookAction::Block(_)));
    }

    #[tokio::test]
    async fn shell_handler_times_out_on_slow_command() {
        let handler = ShellHookHandler::spawn(
            "slow-test",
            vec![HookEvent::CommandBefore],
            "/bin/sleep",
            vec!["5".into()],
            Duration::from_millis(20),
        );
        let payload = HookPayload::CommandBefore {
            session_id: "s1".into(),
            command: "reboot".into(),
        };
        let result = handler.handle(HookEvent::CommandBefore, &payload).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_only_backlog_coalesces_past_depth() {
        let handler = ShellHookHandler::spawn(
            "coalesce-test",
            vec![HookEvent::SessionStart],
            "/bin/sleep",
            vec!["1".into()],
            Duration::from_secs(2),
        );
        for i in 0..(DEFAULT_COALESCE_DEPTH * 2) {
            let payload = HookPayload::SessionStart {
                session_id: format!("s{i}"),
            };
            handler.enqueue(payload).await;
        }
        let backlog_len = handler.backlog.lock().await.len();
        assert!(backlog_len <= DEFAULT_COALESCE_DEPTH);
        assert!(handler.dropped.load(Ordering::Relaxed) > 0);
    }
}
