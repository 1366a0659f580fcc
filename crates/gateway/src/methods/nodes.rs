//! `node.list` / `node.describe`.

use conduit_protocol::{error_codes, ErrorShape};
use serde_json::json;

use crate::nodes::Error as NodeError;

use super::{MethodContext, MethodResult};

pub async fn list(ctx: MethodContext) -> MethodResult {
    let registry = ctx.state.nodes.read().await;
    Ok(json!({ "nodes": registry.list() }))
}

pub async fn describe(ctx: MethodContext) -> MethodResult {
    let node_id = ctx
        .params
        .get("nodeId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ErrorShape::new(error_codes::BAD_REQUEST, "missing \"nodeId\""))?;
    let registry = ctx.state.nodes.read().await;
    let node = registry.get(node_id).map_err(to_error_shape)?;
    Ok(serde_json::to_value(node).unwrap_or(json!({})))
}

fn to_error_shape(err: NodeError) -> ErrorShape {
    match err {
        NodeError::NotFound => ErrorShape::new(error_codes::NOT_FOUND, "node not found"),
    }
}
