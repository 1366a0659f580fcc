//! Config schema types: `gateway`, `channels.<name>`, `hooks.<name>`, `voice.*`, `auth.profiles`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub gateway: GatewayConfig,
    pub channels: HashMap<String, ChannelConfig>,
    pub hooks: HashMap<String, HookConfigEntry>,
    pub voice: VoiceConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    pub handshake_timeout_ms: u64,
    pub method_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            handshake_timeout_ms: conduit_protocol::HANDSHAKE_TIMEOUT_MS,
            method_timeout_ms: conduit_protocol::DEFAULT_METHOD_TIMEOUT_MS,
        }
    }
}

/// Per-channel admission policy. See the gating module in `conduit-channels`
/// for how this is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Anyone may reach the channel.
    Open,
    /// Only senders matching an allowlist entry (glob) may reach it.
    Allowlist,
    /// Unknown senders must complete the pairing-code flow first.
    #[default]
    Pairing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub policy: AdmissionPolicy,
    pub allowlist: Vec<String>,
    /// Path into the secret store where this channel's credentials live.
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfigEntry {
    pub enabled: bool,
    pub events: Vec<String>,
    /// External command to invoke; absent means a built-in/native handler.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub wake_word: Option<String>,
    pub vad: VadConfig,
    pub conversation: ConversationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: String,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Static energy floor; the adaptive floor is clamped above this.
    pub energy_threshold: f32,
    /// Hysteresis on speech start.
    pub speech_confirm_ms: u64,
    /// Hysteresis on speech end.
    pub silence_confirm_ms: u64,
    /// Segments shorter than this are discarded.
    pub min_speech_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            speech_confirm_ms: 100,
            silence_confirm_ms: 1500,
            min_speech_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    WakeWord,
    #[default]
    PushToTalk,
    AlwaysOn,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub mode: ConversationMode,
    /// How long `listening` may run with no confirmed speech end before the
    /// pipeline treats the microphone as stuck open and auto-stops.
    pub listen_timeout_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            mode: ConversationMode::default(),
            listen_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub profiles: HashMap<String, AuthProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthProfile {
    pub role: String,
    pub scopes: Vec<String>,
}
