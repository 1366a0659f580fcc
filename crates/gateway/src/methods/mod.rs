//! Method namespace dispatch. Each method declares its required scope in
//! `conduit_protocol::methods::required_scope`; a call lacking that scope
//! never reaches its handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conduit_protocol::{error_codes, methods, scopes, ErrorShape, ResponseFrame};
use tracing::warn;

use crate::state::GatewayState;

mod config;
mod devices;
mod hooks;
mod nodes;
mod pairing;
mod subscribe;
mod voice;

pub struct MethodContext {
    pub request_id: serde_json::Value,
    pub method: String,
    pub params: serde_json::Value,
    pub client_conn_id: String,
    pub client_role: String,
    pub client_scopes: Vec<String>,
    pub state: Arc<GatewayState>,
}

pub type MethodResult = Result<serde_json::Value, ErrorShape>;
type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

pub struct MethodRegistry {
    handlers: HashMap<&'static str, HandlerFn>,
}

macro_rules! handler {
    ($f:path) => {
        Box::new(|ctx: MethodContext| Box::pin($f(ctx)) as Pin<Box<dyn Future<Output = MethodResult> + Send>>)
    };
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, HandlerFn> = HashMap::new();
        handlers.insert(methods::CONFIG_GET, handler!(config::get));
        handlers.insert(methods::CONFIG_PATCH, handler!(config::patch));
        handlers.insert(methods::DEVICE_PAIR_LIST, handler!(devices::list));
        handlers.insert(methods::DEVICE_PAIR_APPROVE, handler!(devices::approve));
        handlers.insert(methods::DEVICE_PAIR_REJECT, handler!(devices::reject));
        handlers.insert(methods::DEVICE_PAIR_REVOKE, handler!(devices::revoke));
        handlers.insert(methods::PAIRING_LIST, handler!(pairing::list));
        handlers.insert(methods::PAIRING_APPROVE, handler!(pairing::approve));
        handlers.insert(methods::NODE_LIST, handler!(nodes::list));
        handlers.insert(methods::NODE_DESCRIBE, handler!(nodes::describe));
        handlers.insert(methods::HOOKS_LIST, handler!(hooks::list));
        handlers.insert(methods::VOICE_MODE_SET, handler!(voice::mode_set));
        handlers.insert(methods::VOICE_SPEAK, handler!(voice::speak));
        handlers.insert(methods::VOICE_INTERRUPT, handler!(voice::interrupt));
        handlers.insert(methods::SUBSCRIBE, handler!(subscribe::subscribe));
        Self { handlers }
    }

    pub fn method_names(&self) -> Vec<String> {
        self.handlers.keys().map(|s| s.to_string()).collect()
    }

    /// Authorize then dispatch. Unknown methods are `not-found`; methods
    /// whose required scope isn't held by the caller are `forbidden` and
    /// never reach a handler.
    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let request_id = ctx.request_id.clone();
        let method = ctx.method.clone();

        let Some(handler) = self.handlers.get(method.as_str()) else {
            return ResponseFrame::err(
                request_id,
                ErrorShape::new(error_codes::NOT_FOUND, format!("unknown method: {method}")),
            );
        };

        if let Some(required) = methods::required_scope(&method) {
            let granted = ctx
                .client_scopes
                .iter()
                .any(|s| s == scopes::ADMIN || s == required);
            if !granted {
                return ResponseFrame::err(request_id, ErrorShape::forbidden(required));
            }
        }

        match handler(ctx).await {
            Ok(result) => ResponseFrame::ok(request_id, result),
            Err(err) => {
                warn!(method, code = %err.code, "method error");
                ResponseFrame::err(request_id, err)
            }
        }
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
