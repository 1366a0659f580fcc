//! Channel pairing-code lifecycle: binds an unknown channel sender to a new
//! paired device. Distinct from `devices::DeviceRegistry`, which handles
//! clients that connect directly via `hello`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

/// 32-symbol alphabet: A-Z and 2-9, excluding the visually-ambiguous
/// 0/O/1/I.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;
const MAX_PENDING_PER_CHANNEL: usize = 3;
const CODE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown-code")]
    UnknownCode,
    #[error("expired")]
    Expired,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize)]
pub struct PendingCode {
    pub code: String,
    pub channel: String,
    pub sender: String,
    #[serde(skip)]
    pub issued_at: Instant,
    #[serde(skip)]
    pub expires_at: Instant,
}

/// Generates, tracks, and resolves channel pairing codes. The generation
/// path holds its lock only across the alphabet draw and dedup check, never
/// across an `.await`.
pub struct PairingCodeStore {
    /// channel -> pending codes, oldest first.
    pending: HashMap<String, Vec<PendingCode>>,
    /// (channel, sender) -> paired device id, once approved.
    paired: HashMap<(String, String), String>,
}

impl Default for PairingCodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingCodeStore {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            paired: HashMap::new(),
        }
    }

    fn draw_code(existing: &[PendingCode]) -> String {
        let mut rng = rand::rng();
        loop {
            let candidate: String = (0..CODE_LEN)
                .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
                .collect();
            if !existing.iter().any(|p| p.code == candidate) {
                return candidate;
            }
        }
    }

    /// Issue a new pairing code for `sender` on `channel`. If the channel
    /// already holds the maximum pending codes, the oldest is purged first.
    pub fn issue(&mut self, channel: &str, sender: &str) -> PendingCode {
        let bucket = self.pending.entry(channel.to_string()).or_default();
        bucket.retain(|p| Instant::now() < p.expires_at);
        if bucket.len() >= MAX_PENDING_PER_CHANNEL {
            bucket.remove(0);
        }
        let code = Self::draw_code(bucket);
        let now = Instant::now();
        let entry = PendingCode {
            code,
            channel: channel.to_string(),
            sender: sender.to_string(),
            issued_at: now,
            expires_at: now + CODE_TTL,
        };
        bucket.push(entry.clone());
        entry
    }

    pub fn list_pending(&self, channel: &str) -> Vec<&PendingCode> {
        self.pending
            .get(channel)
            .map(|v| v.iter().filter(|p| Instant::now() < p.expires_at).collect())
            .unwrap_or_default()
    }

    /// Resolve a code, binding its sender to a new paired device id.
    pub fn approve(&mut self, channel: &str, code: &str) -> Result<String> {
        let bucket = self.pending.get_mut(channel).ok_or(Error::UnknownCode)?;
        let idx = bucket
            .iter()
            .position(|p| p.code == code)
            .ok_or(Error::UnknownCode)?;
        if Instant::now() >= bucket[idx].expires_at {
            bucket.remove(idx);
            return Err(Error::Expired);
        }
        let entry = bucket.remove(idx);
        let device_id = uuid::Uuid::new_v4().to_string();
        self.paired
            .insert((channel.to_string(), entry.sender.clone()), device_id.clone());
        Ok(device_id)
    }

    pub fn is_paired(&self, channel: &str, sender: &str) -> bool {
        self.paired
            .contains_key(&(channel.to_string(), sender.to_string()))
    }
}

/// Adapts the pairing store to the seam `conduit-channels` depends on, so
/// the channel manager never needs to know about the gateway's event bus or
/// method dispatch — only whether a sender is paired and how to request a
/// code.
pub struct GatewayPairingGateway {
    pub store: std::sync::Arc<tokio::sync::RwLock<PairingCodeStore>>,
}

#[async_trait]
impl conduit_channels::PairingGateway for GatewayPairingGateway {
    async fn is_paired(&self, channel: &str, sender: &str) -> bool {
        self.store.read().await.is_paired(channel, sender)
    }

    async fn request_pairing(&self, channel: &str, sender: &str) -> String {
        self.store.write().await.issue(channel, sender).code
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_codes_use_only_the_32_symbol_alphabet() {
        let mut store = PairingCodeStore::new();
        let code = store.issue("whatsapp", "+999").code;
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn fourth_pending_code_evicts_the_oldest() {
        let mut store = PairingCodeStore::new();
        let first = store.issue("whatsapp", "+1").code;
        store.issue("whatsapp", "+2");
        store.issue("whatsapp", "+3");
        store.issue("whatsapp", "+4");
        let pending = store.list_pending("whatsapp");
        assert_eq!(pending.len(), 3);
        assert!(!pending.iter().any(|p| p.code == first));
    }

    #[test]
    fn approve_unknown_code_is_rejected() {
        let mut store = PairingCodeStore::new();
        store.issue("whatsapp", "+1");
        assert_eq!(store.approve("whatsapp", "NOPENOPE"), Err(Error::UnknownCode));
    }

    #[test]
    fn approve_binds_sender_as_paired() {
        let mut store = PairingCodeStore::new();
        let code = store.issue("whatsapp", "+999").code;
        store.approve("whatsapp", &code).unwrap();
        assert!(store.is_paired("whatsapp", "+999"));
    }
}
