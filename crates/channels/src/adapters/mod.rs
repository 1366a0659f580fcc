//! Thin per-platform adapters. Wire-protocol internals (QR pairing, bot
//! tokens, platform SDKs) are intentionally out of scope here — each adapter
//! only needs to satisfy [`crate::plugin::ChannelAdapter`].

pub mod discord;
pub mod imessage;
pub mod signal;
pub mod slack;
pub mod telegram;
pub mod whatsapp;
