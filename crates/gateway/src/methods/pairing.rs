//! `pairing.list` / `pairing.approve`.

use conduit_protocol::{error_codes, events, ErrorShape};
use serde_json::json;

use crate::broadcast::{self, BroadcastOpts};
use crate::pairing::Error as PairingError;

use super::{MethodContext, MethodResult};

fn channel(ctx: &MethodContext) -> Result<&str, ErrorShape> {
    ctx.params
        .get("channel")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"channel\""))
}

pub async fn list(ctx: MethodContext) -> MethodResult {
    let channel = channel(&ctx)?;
    let store = ctx.state.pairing.read().await;
    Ok(json!({ "pending": store.list_pending(channel) }))
}

pub async fn approve(ctx: MethodContext) -> MethodResult {
    let channel = channel(&ctx)?.to_string();
    let code = ctx
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"code\""))?
        .to_string();

    let device_id = {
        let mut store = ctx.state.pairing.write().await;
        store.approve(&channel, &code).map_err(to_error_shape)?
    };

    ctx.state
        .devices
        .write()
        .await
        .register_paired(&device_id, None, &channel);

    broadcast::broadcast(
        &ctx.state,
        events::PAIRING_APPROVED,
        json!({ "channel": channel, "deviceId": device_id }),
        BroadcastOpts::default(),
    )
    .await;
    broadcast::broadcast(
        &ctx.state,
        events::DEVICE_APPROVED,
        json!({ "deviceId": device_id, "channel": channel }),
        BroadcastOpts::default(),
    )
    .await;
    Ok(json!({ "deviceId": device_id }))
}

fn to_error_shape(err: PairingError) -> ErrorShape {
    match err {
        PairingError::UnknownCode => ErrorShape::new(error_codes::UNKNOWN_CODE, "unknown pairing code"),
        PairingError::Expired => ErrorShape::new(error_codes::EXPIRED, "pairing code expired"),
    }
}
