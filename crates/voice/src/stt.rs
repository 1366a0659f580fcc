//! Speech-to-Text provider abstraction. Segments are sent serially (no
//! concurrent STT per pipeline) to preserve ordering.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A segment of recorded PCM audio, ready for transcription.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    /// Concatenated PCM buffer for the segment.
    pub audio: Bytes,
    pub sample_rate_hz: u32,
    pub language: Option<String>,
}

/// Provider response, trimmed to `{text, confidence?, language?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: Option<f32>,
    pub language: Option<String>,
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    fn id(&self) -> &'static str;
    fn is_configured(&self) -> bool;
    async fn transcribe(&self, request: TranscribeRequest) -> anyhow::Result<Transcript>;
}

/// Stand-in used when no real STT provider is configured. Always reports
/// itself as unconfigured and fails any transcription attempt, so the
/// pipeline's existing "provider unavailable" error path fires honestly
/// instead of the voice state machine silently stalling.
pub struct NullSttProvider;

#[async_trait]
impl SttProvider for NullSttProvider {
    fn id(&self) -> &'static str {
        "null"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn transcribe(&self, _request: TranscribeRequest) -> anyhow::Result<Transcript> {
        anyhow::bail!("no speech-to-text provider configured")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_round_trips_through_json() {
        let t = Transcript {
            text: "hello there".into(),
            confidence: Some(0.92),
            language: Some("en".into()),
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, "hello there");
    }

    #[tokio::test]
    async fn null_provider_is_unconfigured_and_fails() {
        let provider = NullSttProvider;
        assert!(!provider.is_configured());
        let result = provider
            .transcribe(TranscribeRequest {
                audio: Bytes::new(),
                sample_rate_hz: 16_000,
                language: None,
            })
            .await;
        assert!(result.is_err());
    }
}
