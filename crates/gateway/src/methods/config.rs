//! `config.get` / `config.patch`.

use conduit_protocol::{error_codes, events, ErrorShape};
use serde_json::json;

use crate::broadcast::{self, BroadcastOpts};

use super::{MethodContext, MethodResult};

pub async fn get(ctx: MethodContext) -> MethodResult {
    let path = ctx.params.get("path").and_then(|v| v.as_str()).unwrap_or("");
    ctx.state
        .config
        .get(path)
        .await
        .ok_or_else(|| ErrorShape::new(error_codes::NOT_FOUND, format!("no config at path: {path}")))
}

pub async fn patch(ctx: MethodContext) -> MethodResult {
    let path = ctx.params.get("path").and_then(|v| v.as_str()).unwrap_or("");
    let value = ctx
        .params
        .get("value")
        .cloned()
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"value\""))?;
    let create_only = ctx.params.get("createOnly").and_then(|v| v.as_bool()).unwrap_or(false);

    let diff = if create_only {
        ctx.state
            .config
            .patch_create_only(path, value)
            .await
            .map_err(|()| ErrorShape::new(error_codes::CONFLICT, "duplicate name, racing patch rejected"))?
    } else {
        ctx.state.config.patch(path, value).await
    };
    if !diff.is_empty() {
        broadcast::broadcast(
            &ctx.state,
            events::CONFIG_CHANGED,
            json!({
                "added": diff.added,
                "modified": diff.modified,
                "removed": diff.removed,
            }),
            BroadcastOpts::default(),
        )
        .await;
    }
    Ok(json!({ "added": diff.added, "modified": diff.modified, "removed": diff.removed }))
}
