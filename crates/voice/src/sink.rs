//! Observability seam for the pipeline's state machine. Mirrors
//! `conduit-thinker`'s `ThinkerEventSink`: the pipeline owns no bus and no
//! method registry, so it reports through this trait and leaves wiring
//! those reports onto the wire protocol to whoever constructs it.

use async_trait::async_trait;

use crate::state::VoiceState;

#[async_trait]
pub trait VoiceEventSink: Send + Sync {
    /// Called after every successful state transition, with the new state.
    async fn on_state(&self, state: VoiceState);

    /// Called once a completed segment has been transcribed (or discarded
    /// as silence/failure, in which case `text` is `None`).
    async fn on_transcript(&self, text: Option<String>);

    /// Called when a turn fails in a way the caller should be told about
    /// (STT, thinker, or TTS failure).
    async fn on_error(&self, message: String);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullVoiceEventSink;

#[async_trait]
impl VoiceEventSink for NullVoiceEventSink {
    async fn on_state(&self, _state: VoiceState) {}
    async fn on_transcript(&self, _text: Option<String>) {}
    async fn on_error(&self, _message: String) {}
}
