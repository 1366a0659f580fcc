//! Configuration loading, patch semantics, and credential storage.
//!
//! Config files: `conduit.toml`, `conduit.yaml`, or `conduit.json`.
//! Searched in `./` then the platform config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod patch;
pub mod schema;
pub mod secret;
pub mod store;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config},
    patch::{Diff, apply_patch, get_path},
    schema::{
        AdmissionPolicy, AuthConfig, AuthProfile, ChannelConfig, ConduitConfig, ConversationConfig, ConversationMode,
        GatewayConfig, HookConfigEntry, SttConfig, TtsConfig, VadConfig, VoiceConfig,
    },
    secret::{FileSecretBackend, SecretBackend},
    store::ConfigStore,
};
