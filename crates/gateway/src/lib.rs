//! The WebSocket control plane: connection handshake, method dispatch,
//! event bus, and the registries (devices, pairing, nodes) it owns.

pub mod broadcast;
pub mod channel_bridge;
pub mod devices;
pub mod hook_dispatch;
pub mod methods;
pub mod nodes;
pub mod pairing;
pub mod server;
pub mod state;
pub mod voice_bridge;
pub mod ws;

pub use state::GatewayState;
