//! Channel lifecycle: a table `name → adapter`, policy enforcement on every
//! inbound item before it reaches the bus, and exponential-backoff restart
//! on adapter failure.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use conduit_config::{AdmissionPolicy, ChannelConfig};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    gating::{Admission, admit},
    plugin::{AdapterState, ChannelAdapter, InboundItem},
};

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP_MS: u64 = 60_000;
const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Computes the next backoff delay (base 1s, factor 2, cap 60s, plus jitter
/// up to 20% of the computed delay).
pub fn backoff_delay(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.min(10);
    let base = BACKOFF_BASE_MS.saturating_mul(BACKOFF_FACTOR.saturating_pow(exp) as u64);
    let capped = base.min(BACKOFF_CAP_MS);
    let jitter = rand::rng().random_range(0..=(capped / 5).max(1));
    Duration::from_millis(capped + jitter)
}

/// Injected by the gateway: looks up and requests device pairing for a
/// channel/sender pair. Kept as a trait so `conduit-channels` never depends
/// on `conduit-gateway` (the dependency runs the other way).
#[async_trait]
pub trait PairingGateway: Send + Sync {
    async fn is_paired(&self, channel: &str, sender: &str) -> bool;
    /// Issues a pairing code for `sender` on `channel`, per the pairing
    /// algorithm's pending-set cap. Returns the code.
    async fn request_pairing(&self, channel: &str, sender: &str) -> String;
}

/// Injected by the gateway: publishes channel-originated items and status to
/// the event bus.
#[async_trait]
pub trait ChannelBusSink: Send + Sync {
    async fn publish_inbound(&self, channel: &str, item: InboundItem);
    async fn publish_status(&self, channel: &str, state: AdapterState);
    async fn publish_pairing_requested(&self, channel: &str, sender: &str, code: &str);
}

struct ManagedChannel {
    adapter: Box<dyn ChannelAdapter>,
    config: ChannelConfig,
    state: AdapterState,
    consecutive_failures: u32,
}

/// Owns every registered channel adapter and runs its start/retry loop.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, ManagedChannel>>,
    pairing: Arc<dyn PairingGateway>,
    bus: Arc<dyn ChannelBusSink>,
}

impl ChannelManager {
    pub fn new(pairing: Arc<dyn PairingGateway>, bus: Arc<dyn ChannelBusSink>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            pairing,
            bus,
        }
    }

    pub async fn register(&self, adapter: Box<dyn ChannelAdapter>, config: ChannelConfig) {
        let name = adapter.name().to_string();
        let mut channels = self.channels.write().await;
        channels.insert(
            name,
            ManagedChannel {
                adapter,
                config,
                state: AdapterState::Disconnected,
                consecutive_failures: 0,
            },
        );
    }

    pub async fn state_of(&self, name: &str) -> Option<AdapterState> {
        self.channels.read().await.get(name).map(|c| c.state)
    }

    pub async fn names(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Start a single channel, retrying with backoff on failure. Runs until
    /// `stop` is requested via `CancellationToken` cancellation upstream;
    /// callers typically spawn this per channel.
    pub async fn run_channel(&self, name: &str) {
        loop {
            let start_result = {
                let mut channels = self.channels.write().await;
                let Some(entry) = channels.get_mut(name) else { return };
                if !entry.config.enabled {
                    return;
                }
                entry.state = AdapterState::Connecting;
                entry.adapter.start().await
            };

            match start_result {
                Ok(()) => {
                    let mut receiver = {
                        let mut channels = self.channels.write().await;
                        let Some(entry) = channels.get_mut(name) else { return };
                        entry.state = AdapterState::Connected;
                        entry.consecutive_failures = 0;
                        entry.adapter.events()
                    };
                    self.bus.publish_status(name, AdapterState::Connected).await;
                    info!(channel = name, "channel adapter connected");

                    if let Some(rx) = &mut receiver {
                        while let Some(item) = rx.recv().await {
                            self.handle_inbound(name, item).await;
                        }
                    }
                    debug!(channel = name, "channel adapter event stream ended, restarting");
                },
                Err(e) => {
                    let failures = {
                        let mut channels = self.channels.write().await;
                        let Some(entry) = channels.get_mut(name) else { return };
                        entry.consecutive_failures += 1;
                        if entry.consecutive_failures >= DEGRADED_AFTER_FAILURES {
                            entry.state = AdapterState::Degraded;
                        } else {
                            entry.state = AdapterState::Disconnected;
                        }
                        entry.consecutive_failures
                    };
                    warn!(channel = name, error = %e, failures, "channel adapter start failed");
                    self.bus.publish_status(name, AdapterState::Degraded).await;
                    tokio::time::sleep(backoff_delay(failures)).await;
                    continue;
                },
            }
        }
    }

    async fn handle_inbound(&self, name: &str, item: InboundItem) {
        let (policy, allowlist) = {
            let channels = self.channels.read().await;
            match channels.get(name) {
                Some(entry) => (entry.config.policy, entry.config.allowlist.clone()),
                None => return,
            }
        };

        let is_paired = matches!(policy, AdmissionPolicy::Pairing) && self.pairing.is_paired(name, &item.sender).await;

        match admit(policy, &item.sender, &allowlist, is_paired) {
            Admission::Allowed => self.bus.publish_inbound(name, item).await,
            Admission::Denied => debug!(channel = name, sender = %item.sender, "inbound item denied by allowlist"),
            Admission::NeedsPairing => {
                let code = self.pairing.request_pairing(name, &item.sender).await;
                self.bus.publish_pairing_requested(name, &item.sender, &code).await;
            },
        }
    }

    pub async fn send(&self, name: &str, recipient: &str, payload: &crate::plugin::OutboundPayload) -> anyhow::Result<()> {
        let channels = self.channels.read().await;
        let entry = channels
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown channel: {name}"))?;
        entry.adapter.send(recipient, payload).await
    }

    pub async fn stop(&self, name: &str) -> anyhow::Result<()> {
        let mut channels = self.channels.write().await;
        let Some(entry) = channels.get_mut(name) else {
            return Ok(());
        };
        entry.adapter.stop().await?;
        entry.state = AdapterState::Disconnected;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let d0 = backoff_delay(0).as_millis();
        let d1 = backoff_delay(1).as_millis();
        let d_large = backoff_delay(20).as_millis();
        assert!(d0 >= 1_000 && d0 < 1_300);
        assert!(d1 >= 2_000 && d1 < 2_500);
        assert!(d_large <= (BACKOFF_CAP_MS as u128) * 6 / 5);
    }
}
