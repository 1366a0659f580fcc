//! `voice.mode.set` / `voice.speak` / `voice.interrupt`.

use conduit_config::ConversationMode;
use conduit_protocol::{error_codes, ErrorShape};
use serde_json::json;

use super::{MethodContext, MethodResult};

/// Resolves the "method wins, then writes back" precedence for `voice.mode.set`
/// vs. a `config.patch` on `voice.conversation.mode` arriving at the same time.
pub async fn mode_set(ctx: MethodContext) -> MethodResult {
    let mode_str = ctx
        .params
        .get("mode")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"mode\""))?;
    let mode: ConversationMode = serde_json::from_value(json!(mode_str))
        .map_err(|_| ErrorShape::new(error_codes::BAD_REQUEST, format!("unknown mode: {mode_str}")))?;

    let pipeline = ctx.state.voice.read().await;
    let Some(pipeline) = pipeline.as_ref() else {
        return Err(ErrorShape::new(error_codes::UNAVAILABLE, "voice pipeline not running"));
    };
    pipeline.lock().await.set_mode(mode);
    drop(pipeline);

    ctx.state.config.patch("voice.conversation.mode", json!(mode_str)).await;
    Ok(json!({ "mode": mode_str }))
}

pub async fn speak(ctx: MethodContext) -> MethodResult {
    let text = ctx
        .params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"text\""))?
        .to_string();

    let pipeline = ctx.state.voice.read().await;
    let Some(pipeline) = pipeline.as_ref() else {
        return Err(ErrorShape::new(error_codes::UNAVAILABLE, "voice pipeline not running"));
    };
    pipeline
        .lock()
        .await
        .speak_now(text)
        .await
        .map_err(|err| ErrorShape::new(error_codes::INTERNAL, err.to_string()))?;
    Ok(json!({}))
}

pub async fn interrupt(ctx: MethodContext) -> MethodResult {
    let pipeline = ctx.state.voice.read().await;
    let Some(pipeline) = pipeline.as_ref() else {
        return Err(ErrorShape::new(error_codes::UNAVAILABLE, "voice pipeline not running"));
    };
    pipeline
        .lock()
        .await
        .interrupt()
        .await
        .map_err(|err| ErrorShape::new(error_codes::INTERNAL, err.to_string()))?;
    Ok(json!({}))
}
