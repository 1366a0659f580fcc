//! The adapter contract channel plugins must satisfy. Wire-protocol
//! internals (QR pairing flows, platform SDKs) are the adapter's own
//! business — the manager only ever sees this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// An inbound item delivered by an adapter's event stream.
#[derive(Debug, Clone)]
pub struct InboundItem {
    pub sender: String,
    pub text: String,
    pub media_refs: Vec<String>,
    pub timestamp_ms: u64,
}

/// An outbound payload handed to an adapter's `send`.
#[derive(Debug, Clone, Default)]
pub struct OutboundPayload {
    pub text: String,
    pub media_refs: Vec<String>,
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media_refs: Vec::new(),
        }
    }
}

/// Adapter health, surfaced through `node.describe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

/// The minimal capability set every channel adapter must implement.
///
/// `events()` returns the receiving half of a channel populated while the
/// adapter is running; it is finite per connection and restartable on
/// reconnect, per the adapter contract.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Wire-protocol channel name (e.g. `"telegram"`).
    fn name(&self) -> &str;

    async fn start(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
    async fn send(&self, recipient: &str, payload: &OutboundPayload) -> anyhow::Result<()>;

    /// Hand off the inbound stream. Returns `None` if called before `start`
    /// or after the stream has already been taken.
    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>>;
}
