//! Gateway WebSocket/RPC protocol definitions.
//!
//! All communication uses JSON frames over WebSocket. The handshake is
//! challenge/response: the server sends `challenge`, the client replies
//! `hello`, and the server answers `hello-ok` or `hello-err`. After
//! authentication the connection carries method calls (`{id, method,
//! params}`) and server-pushed events (`{type:"event", event, data, seq}`).

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 524_288; // 512 KB
pub const MAX_BUFFERED_BYTES: usize = 1_572_864; // 1.5 MB

pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const DEFAULT_METHOD_TIMEOUT_MS: u64 = 30_000; // 30s
pub const HOOK_COMMAND_TIMEOUT_MS: u64 = 5_000; // 5s
pub const STT_TTS_TIMEOUT_MS: u64 = 60_000; // 60s
pub const THINKER_TIMEOUT_MS: u64 = 120_000; // 120s
pub const OUTBOUND_ENQUEUE_TIMEOUT_MS: u64 = 2_000; // 2s

pub const PAIRING_CODE_LEN: usize = 8;
pub const PAIRING_CODE_TTL_MS: u64 = 3_600_000; // 1h
pub const PAIRING_MAX_PENDING_PER_CHANNEL: usize = 3;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const FORBIDDEN: &str = "forbidden";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const BAD_REQUEST: &str = "bad-request";
    pub const NOT_FOUND: &str = "not-found";
    pub const UNKNOWN_CODE: &str = "unknown-code";
    pub const EXPIRED: &str = "expired";
    pub const HANDSHAKE_TIMEOUT: &str = "handshake-timeout";
    pub const SLOW_CLIENT: &str = "slow-client";
    pub const UNAVAILABLE: &str = "provider-unavailable";
    pub const INTERNAL: &str = "internal";
    pub const CONFLICT: &str = "conflict";
}

// ── Scopes ───────────────────────────────────────────────────────────────────

pub mod scopes {
    pub const CONFIG_READ: &str = "config.read";
    pub const CONFIG_WRITE: &str = "config.write";
    pub const ADMIN: &str = "admin";
    pub const NODE_READ: &str = "node.read";
    pub const VOICE: &str = "voice";
}

// ── Roles ────────────────────────────────────────────────────────────────────

pub mod roles {
    pub const NODE: &str = "node";
    pub const ADMIN: &str = "admin";
    pub const OBSERVER: &str = "observer";
}

// ── Event names ──────────────────────────────────────────────────────────────

pub mod events {
    pub const CONFIG_CHANGED: &str = "config:changed";
    pub const DEVICE_APPROVED: &str = "device:approved";
    pub const DEVICE_REVOKED: &str = "device:revoked";
    pub const PAIRING_REQUESTED: &str = "pairing:requested";
    pub const PAIRING_APPROVED: &str = "pairing:approved";
    pub const CHANNEL_STATUS: &str = "channel:status";
    pub const VOICE_STATE: &str = "voice:state";
    pub const VOICE_TRANSCRIPT: &str = "voice:transcript";
    pub const VOICE_ERROR: &str = "voice:error";
    pub const HOOK_FIRED: &str = "hook:fired";
    pub const THINKER_PREFLIGHT: &str = "thinker:preflight";
    pub const THINKER_COMPLETE: &str = "thinker:complete";
    pub const BACKPRESSURE: &str = "backpressure";

    /// Events exempt from backpressure-driven drops; the connection is closed
    /// instead of silently discarding them.
    pub const CRITICAL: &[&str] = &[DEVICE_APPROVED, DEVICE_REVOKED, PAIRING_APPROVED, VOICE_ERROR];
}

// ── Method namespace ─────────────────────────────────────────────────────────

pub mod methods {
    pub const CONFIG_GET: &str = "config.get";
    pub const CONFIG_PATCH: &str = "config.patch";
    pub const DEVICE_PAIR_LIST: &str = "device.pair.list";
    pub const DEVICE_PAIR_APPROVE: &str = "device.pair.approve";
    pub const DEVICE_PAIR_REJECT: &str = "device.pair.reject";
    pub const DEVICE_PAIR_REVOKE: &str = "device.pair.revoke";
    pub const PAIRING_LIST: &str = "pairing.list";
    pub const PAIRING_APPROVE: &str = "pairing.approve";
    pub const NODE_LIST: &str = "node.list";
    pub const NODE_DESCRIBE: &str = "node.describe";
    pub const HOOKS_LIST: &str = "hooks.list";
    pub const VOICE_MODE_SET: &str = "voice.mode.set";
    pub const VOICE_SPEAK: &str = "voice.speak";
    pub const VOICE_INTERRUPT: &str = "voice.interrupt";
    pub const SUBSCRIBE: &str = "subscribe";

    /// Returns the scope required to invoke `method`, or `None` if unknown.
    pub fn required_scope(method: &str) -> Option<&'static str> {
        use crate::scopes::*;
        Some(match method {
            CONFIG_GET | HOOKS_LIST => CONFIG_READ,
            CONFIG_PATCH => CONFIG_WRITE,
            DEVICE_PAIR_LIST | DEVICE_PAIR_APPROVE | DEVICE_PAIR_REJECT | DEVICE_PAIR_REVOKE | PAIRING_LIST
            | PAIRING_APPROVE => ADMIN,
            NODE_LIST | NODE_DESCRIBE => NODE_READ,
            VOICE_MODE_SET | VOICE_SPEAK | VOICE_INTERRUPT => VOICE,
            SUBSCRIBE => CONFIG_READ,
            _ => return None,
        })
    }
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn forbidden(required_scope: &str) -> Self {
        Self::new(
            error_codes::FORBIDDEN,
            format!("missing required scope: {required_scope}"),
        )
    }
}

// ── Handshake frames ─────────────────────────────────────────────────────────

/// Server → client, first frame on every accepted connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeFrame {
    pub r#type: String, // always "challenge"
    pub challenge: String,
}

impl ChallengeFrame {
    pub fn new(challenge: impl Into<String>) -> Self {
        Self {
            r#type: "challenge".into(),
            challenge: challenge.into(),
        }
    }
}

/// Client → server, response to `challenge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloFrame {
    pub r#type: String, // always "hello"
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub token: String,
    pub scopes: Vec<String>,
}

/// Server → client, successful handshake result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOkFrame {
    pub r#type: String, // always "hello-ok"
    pub role: String,
    #[serde(rename = "grantedScopes")]
    pub granted_scopes: Vec<String>,
    pub version: u32,
}

impl HelloOkFrame {
    pub fn new(role: impl Into<String>, granted_scopes: Vec<String>) -> Self {
        Self {
            r#type: "hello-ok".into(),
            role: role.into(),
            granted_scopes,
            version: PROTOCOL_VERSION,
        }
    }
}

/// Server → client, failed handshake result. The connection is closed after sending this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloErrFrame {
    pub r#type: String, // always "hello-err"
    pub reason: String,
}

impl HelloErrFrame {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            r#type: "hello-err".into(),
            reason: reason.into(),
        }
    }
}

// ── RPC frames ───────────────────────────────────────────────────────────────

/// Client → server method call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: serde_json::Value, // int or string
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Server → client method result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: serde_json::Value, error: ErrorShape) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Server → client server-push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub r#type: String, // always "event"
    pub event: String,
    pub data: serde_json::Value,
    pub seq: u64,
    pub ts: u64,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value, seq: u64, ts: u64) -> Self {
        Self {
            r#type: "event".into(),
            event: event.into(),
            data,
            seq,
            ts,
        }
    }
}

/// Discriminated union of every frame that can appear on the wire, used by the
/// server-side parser to sniff an incoming text message before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewayFrame {
    Challenge(ChallengeFrame),
    Hello(HelloFrame),
    HelloOk(HelloOkFrame),
    HelloErr(HelloErrFrame),
    Event(EventFrame),
    Request(RequestFrame),
    Response(ResponseFrame),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_frame_round_trips() {
        let frame = ChallengeFrame::new("abc123");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"challenge\""));
        let parsed: ChallengeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.challenge, "abc123");
    }

    #[test]
    fn request_frame_parses_string_and_int_ids() {
        let by_int: RequestFrame = serde_json::from_str(
            r#"{"id":1,"method":"config.get","params":{"path":"voice.stt"}}"#,
        )
        .unwrap();
        assert_eq!(by_int.method, "config.get");

        let by_str: RequestFrame =
            serde_json::from_str(r#"{"id":"r1","method":"node.list"}"#).unwrap();
        assert!(by_str.params.is_none());
    }

    #[test]
    fn response_err_omits_result() {
        let resp = ResponseFrame::err(
            serde_json::json!(2),
            ErrorShape::forbidden(scopes::CONFIG_WRITE),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], "forbidden");
    }

    #[test]
    fn method_scope_lookup() {
        assert_eq!(methods::required_scope(methods::CONFIG_PATCH), Some(scopes::CONFIG_WRITE));
        assert_eq!(methods::required_scope(methods::NODE_LIST), Some(scopes::NODE_READ));
        assert_eq!(methods::required_scope("nonexistent.method"), None);
    }

    #[test]
    fn event_frame_carries_seq() {
        let event = EventFrame::new("config:changed", serde_json::json!({"path": "voice"}), 42, 1_700_000_000_000);
        assert_eq!(event.seq, 42);
        assert_eq!(event.r#type, "event");
    }
}
