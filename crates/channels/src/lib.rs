//! Channel Manager: lifecycle of messaging-platform adapters, allowlist and
//! pairing admission policies, and the inbound path onto the bus.

pub mod adapters;
pub mod gating;
pub mod plugin;
pub mod registry;

pub use {
    gating::{Admission, admit, is_allowed},
    plugin::{AdapterState, ChannelAdapter, InboundItem, OutboundPayload},
    registry::{ChannelBusSink, ChannelManager, PairingGateway, backoff_delay},
};
