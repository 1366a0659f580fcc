//! Slack Events API / Socket Mode adapter. App-level signing and event
//! subscription setup are out of scope — this crate only has to satisfy the
//! adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct SlackAdapter {
    account_id: String,
    app_token: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl SlackAdapter {
    pub fn new(account_id: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            app_token: app_token.into(),
            inbound_tx: None,
            inbound_rx: None,
        }
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if self.app_token.trim().is_empty() {
            anyhow::bail!("slack account {} missing app token", self.account_id);
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
        tracing::debug!(account = %self.account_id, channel = recipient, len = payload.text.len(), "slack send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
