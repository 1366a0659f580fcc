//! WhatsApp adapter. QR-linking and the multi-device socket protocol are
//! out of scope — this crate only has to satisfy the adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct WhatsAppAdapter {
    account_id: String,
    session_path: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl WhatsAppAdapter {
    pub fn new(account_id: impl Into<String>, session_path: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            session_path: session_path.into(),
            inbound_tx: None,
            inbound_rx: None,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel(64);
        self.inbound_tx = Some(tx);
        self.inbound_rx = Some(rx);
        tracing::debug!(account = %self.account_id, session = %self.session_path, "whatsapp session restore");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.inbound_tx = None;
        self.inbound_rx = None;
        Ok(())
    }

    async fn send(&self, recipient: &str, payload: &OutboundPayload) -> anyhow::Result<()> {
        tracing::debug!(account = %self.account_id, jid = recipient, len = payload.text.len(), "whatsapp send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
