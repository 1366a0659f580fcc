//! Text-to-Speech provider abstraction. Synthesis streams audio chunks so
//! playback can start before the full utterance is generated, and so an
//! `interrupt` can stop mid-stream.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Pcm,
    Opus,
    Mp3,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesizeRequest {
    pub text: String,
    pub voice_id: Option<String>,
    pub output_format: AudioFormat,
}

/// A chunk of synthesized audio, or the terminal markers of the stream.
#[derive(Debug, Clone)]
pub enum AudioChunk {
    Data(Bytes),
    Done,
    Error(String),
}

pub type AudioStream = mpsc::Receiver<AudioChunk>;

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn id(&self) -> &'static str;
    fn is_configured(&self) -> bool;

    /// Begin synthesis, returning the receiving half of a stream the
    /// pipeline's player consumes. Dropping the receiver (on `interrupt`)
    /// must cause the provider to stop producing further chunks.
    async fn synthesize(&self, request: SynthesizeRequest) -> anyhow::Result<AudioStream>;
}

/// Stand-in used when no real TTS provider is configured.
pub struct NullTtsProvider;

#[async_trait]
impl TtsProvider for NullTtsProvider {
    fn id(&self) -> &'static str {
        "null"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn synthesize(&self, _request: SynthesizeRequest) -> anyhow::Result<AudioStream> {
        anyhow::bail!("no text-to-speech provider configured")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_is_unconfigured_and_fails() {
        let provider = NullTtsProvider;
        assert!(!provider.is_configured());
        assert!(provider.synthesize(SynthesizeRequest::default()).await.is_err());
    }
}
