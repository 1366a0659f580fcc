//! `hooks.list`.

use std::sync::atomic::Ordering;

use serde_json::json;

use super::{MethodContext, MethodResult};

pub async fn list(ctx: MethodContext) -> MethodResult {
    let registry = ctx.state.hooks.read().await;
    let snapshot: Vec<_> = registry
        .handler_names()
        .into_iter()
        .map(|name| {
            let stats = registry.handler_stats(&name);
            let Some(stats) = stats else {
                return json!({ "name": name });
            };
            let last_triggered_ms_ago = stats
                .last_triggered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .map(|at| at.elapsed().as_millis() as u64);
            let history: Vec<_> = stats
                .history_snapshot()
                .into_iter()
                .map(|h| {
                    json!({
                        "agoMs": h.at.elapsed().as_millis() as u64,
                        "durationMs": h.duration.as_millis() as u64,
                        "success": h.success,
                        "error": h.error,
                    })
                })
                .collect();
            json!({
                "name": name,
                "enabled": !stats.disabled.load(Ordering::Relaxed),
                "triggerCount": stats.call_count.load(Ordering::Relaxed),
                "failureCount": stats.failure_count.load(Ordering::Relaxed),
                "lastTriggeredMsAgo": last_triggered_ms_ago,
                "recentHistory": history,
            })
        })
        .collect();
    Ok(json!({ "hooks": snapshot, "dryRun": registry.dry_run }))
}
