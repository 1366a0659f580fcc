//! iMessage adapter. The AppleScript/`chat.db` bridge a host process uses to
//! reach Messages.app is out of scope — this crate only has to satisfy the
//! adapter contract. Only buildable where a native bridge is present; on
//! other platforms `start` fails fast.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct IMessageAdapter {
    account_id: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl IMessageAdapter {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            inbound_tx: None,
            inbound_rx: None,
        }
    }
}

#[async_trait]
impl ChannelAdapter for IMessageAdapter {
    fn name(&self) -> &str {
        "imessage"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if cfg!(not(target_os = "macos")) {
            anyhow::bail!("imessage account {} requires a macOS host bridge", self.account_id);
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
        tracing::debug!(account = %self.account_id, handle = recipient, len = payload.text.len(), "imessage send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
