//! Shared gateway runtime state: connected clients, sequence counter, and
//! the registries it owns.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use conduit_common::hooks::HookRegistry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::broadcast::OutboundQueue;
use crate::devices::DeviceRegistry;
use crate::nodes::NodeRegistry;
use crate::pairing::PairingCodeStore;

/// Lifecycle stage of a connection, per the handshake in spec section 4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingHello,
    Challenged,
    Authenticated,
    Closed,
}

/// A WebSocket client currently connected to the gateway.
pub struct ConnectedClient {
    pub conn_id: String,
    pub device_id: Option<String>,
    pub role: String,
    pub scopes: Vec<String>,
    pub phase: SessionPhase,
    pub challenge_nonce: String,
    pub queue: Arc<OutboundQueue>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    /// Cancelled to force this connection's read loop to exit, e.g. when
    /// the device it authenticated as is revoked mid-session.
    pub cancel: CancellationToken,
    /// `None` until the client calls `subscribe`, meaning "deliver every
    /// event this connection's scopes allow" (the pre-subscribe default).
    /// Once set, only events named here are delivered, except events in
    /// `conduit_protocol::events::CRITICAL`, which always bypass the filter.
    pub subscriptions: RwLock<Option<HashSet<String>>>,
}

impl ConnectedClient {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == conduit_protocol::scopes::ADMIN || s == scope)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Shared gateway runtime state, held behind an `Arc` and reached from every
/// connection task, method handler, and the channel/voice subsystems.
pub struct GatewayState {
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    pub seq: AtomicU64,
    pub devices: RwLock<DeviceRegistry>,
    /// Shared with `GatewayPairingGateway` so `conduit-channels`' pairing
    /// flow and the `pairing.*` methods operate on the same store.
    pub pairing: Arc<RwLock<PairingCodeStore>>,
    pub nodes: RwLock<NodeRegistry>,
    pub config: Arc<conduit_config::ConfigStore>,
    pub hooks: RwLock<HookRegistry>,
    /// The running voice pipeline, if voice I/O is enabled for this
    /// gateway. `None` when started with `mode: off` and no audio devices
    /// configured.
    pub voice: RwLock<Option<conduit_voice::SharedPipeline>>,
    /// Shared LLM port, used by both the voice pipeline (via
    /// `voice_bridge::ThinkerAdapter`) and inbound channel messages. `None`
    /// only if startup failed to construct even the null stand-in.
    pub thinker: RwLock<Option<Arc<dyn conduit_thinker::Thinker>>>,
    /// The running channel manager, if any channels are configured.
    pub channels: RwLock<Option<Arc<conduit_channels::ChannelManager>>>,
    pub version: String,
    pub hostname: String,
}

impl GatewayState {
    pub fn new(config: Arc<conduit_config::ConfigStore>) -> Arc<Self> {
        let hostname = hostname_or_unknown();
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            devices: RwLock::new(DeviceRegistry::new()),
            pairing: Arc::new(RwLock::new(PairingCodeStore::new())),
            nodes: RwLock::new(NodeRegistry::new()),
            config,
            hooks: RwLock::new(HookRegistry::new()),
            voice: RwLock::new(None),
            thinker: RwLock::new(None),
            channels: RwLock::new(None),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
        })
    }

    /// Next monotonically increasing bus sequence number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Cancel every connection currently authenticated as `device_id`. Used
    /// after a revoke so a live session can't keep issuing calls under
    /// scopes that no longer exist.
    pub async fn close_device_connections(&self, device_id: &str) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            if client.device_id.as_deref() == Some(device_id) {
                client.cancel.cancel();
            }
        }
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into())
}
