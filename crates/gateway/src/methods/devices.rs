//! `device.pair.list` / `device.pair.approve` / `device.pair.reject`.

use conduit_protocol::{error_codes, events, ErrorShape};
use serde_json::json;

use crate::broadcast::{self, BroadcastOpts};
use crate::devices::Error as DeviceError;

use super::{MethodContext, MethodResult};

fn device_id(ctx: &MethodContext) -> Result<&str, ErrorShape> {
    ctx.params
        .get("deviceId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"deviceId\""))
}

pub async fn list(ctx: MethodContext) -> MethodResult {
    let registry = ctx.state.devices.read().await;
    Ok(json!({
        "pending": registry.list_pending(),
        "approved": registry.list_approved(),
    }))
}

pub async fn approve(ctx: MethodContext) -> MethodResult {
    let device_id = device_id(&ctx)?.to_string();
    let device = {
        let mut registry = ctx.state.devices.write().await;
        registry.approve(&device_id).map_err(to_error_shape)?
    };
    broadcast::broadcast(
        &ctx.state,
        events::DEVICE_APPROVED,
        serde_json::to_value(&device).unwrap_or(json!({"deviceId": device_id})),
        BroadcastOpts::default(),
    )
    .await;
    Ok(serde_json::to_value(device).unwrap_or(json!({})))
}

pub async fn reject(ctx: MethodContext) -> MethodResult {
    let device_id = device_id(&ctx)?.to_string();
    ctx.state
        .devices
        .write()
        .await
        .reject(&device_id)
        .map_err(to_error_shape)?;
    Ok(json!({ "deviceId": device_id }))
}

pub async fn revoke(ctx: MethodContext) -> MethodResult {
    let device_id = device_id(&ctx)?.to_string();
    {
        let mut registry = ctx.state.devices.write().await;
        registry.revoke(&device_id).map_err(to_error_shape)?;
    }
    ctx.state.close_device_connections(&device_id).await;
    broadcast::broadcast(
        &ctx.state,
        events::DEVICE_REVOKED,
        json!({ "deviceId": device_id }),
        BroadcastOpts::default(),
    )
    .await;
    Ok(json!({ "deviceId": device_id }))
}

fn to_error_shape(err: DeviceError) -> ErrorShape {
    match err {
        DeviceError::NotFound => ErrorShape::new(error_codes::NOT_FOUND, "device not found"),
    }
}
