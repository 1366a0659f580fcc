//! Wires `Recorder` -> VAD -> wake-word -> STT -> thinker -> TTS -> `Player`
//! into a single running task, driven by [`VoiceState`]. Every suspending
//! step accepts a [`CancellationToken`] so the whole pipeline can be torn
//! down (or a single turn interrupted) without leaking a stuck await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use conduit_config::{ConversationMode, VadConfig};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::io::{Player, Recorder};
use crate::sink::{NullVoiceEventSink, VoiceEventSink};
use crate::stt::{SttProvider, TranscribeRequest};
use crate::state::{TransitionError, VoiceEvent, VoiceState};
use crate::tts::{AudioChunk, AudioFormat, SynthesizeRequest, TtsProvider};
use crate::vad::{Vad, VadEvent};
use crate::wake_word::WakeWordDetector;

/// Callers of the pipeline plug in how a transcript becomes a reply.
/// `conduit-thinker` provides the real implementation; tests can stub it.
#[async_trait::async_trait]
pub trait Thinker: Send + Sync {
    async fn think(&self, transcript: &str) -> anyhow::Result<String>;
}

/// Frame size/rate the VAD and wake-word detector operate on. 20ms frames
/// at 16kHz mono PCM16 is the common default for speech pipelines.
const FRAME_DURATION: Duration = Duration::from_millis(20);
const SAMPLE_RATE_HZ: u32 = 16_000;

pub struct PipelineConfig {
    pub mode: ConversationMode,
    pub vad: VadConfig,
    pub wake_phrases: Vec<String>,
    pub wake_sensitivity: f32,
    pub voice_id: Option<String>,
    /// Auto-stop ceiling for `Listening` with no confirmed speech end.
    pub listen_timeout: Duration,
}

/// Owns the running voice turn. A single task drives this; state is not
/// shared across threads, matching the "one speech buffer at a time"
/// invariant.
pub struct VoicePipeline {
    state: VoiceState,
    mode: ConversationMode,
    vad: Vad,
    wake_word: Box<dyn WakeWordDetector>,
    recorder: Box<dyn Recorder>,
    player: Box<dyn Player>,
    stt: Arc<dyn SttProvider>,
    thinker: Arc<dyn Thinker>,
    tts: Arc<dyn TtsProvider>,
    voice_id: Option<String>,
    segment_buf: Vec<u8>,
    cancel: CancellationToken,
    sink: Arc<dyn VoiceEventSink>,
    listen_timeout: Duration,
    listening_since: Option<Instant>,
}

impl VoicePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        wake_word: Box<dyn WakeWordDetector>,
        recorder: Box<dyn Recorder>,
        player: Box<dyn Player>,
        stt: Arc<dyn SttProvider>,
        thinker: Arc<dyn Thinker>,
        tts: Arc<dyn TtsProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_sink(
            config,
            wake_word,
            recorder,
            player,
            stt,
            thinker,
            tts,
            cancel,
            Arc::new(NullVoiceEventSink),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_sink(
        config: PipelineConfig,
        wake_word: Box<dyn WakeWordDetector>,
        recorder: Box<dyn Recorder>,
        player: Box<dyn Player>,
        stt: Arc<dyn SttProvider>,
        thinker: Arc<dyn Thinker>,
        tts: Arc<dyn TtsProvider>,
        cancel: CancellationToken,
        sink: Arc<dyn VoiceEventSink>,
    ) -> Self {
        Self {
            state: VoiceState::Idle,
            mode: config.mode,
            vad: Vad::new(config.vad),
            wake_word,
            recorder,
            player,
            stt,
            thinker,
            tts,
            voice_id: config.voice_id,
            segment_buf: Vec::new(),
            cancel,
            sink,
            listen_timeout: config.listen_timeout,
            listening_since: None,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// Switch conversation modes at runtime (`voice.mode.set`). Does not
    /// itself drive a state transition; the next frame observes the new
    /// mode.
    pub fn set_mode(&mut self, mode: ConversationMode) {
        info!(?mode, "voice mode changed");
        self.mode = mode;
    }

    async fn apply(&mut self, event: &VoiceEvent) -> Result<(), TransitionError> {
        let next = self.state.transition(self.mode, event)?;
        debug!(from = ?self.state, to = ?next, ?event, "voice state transition");
        self.state = next;
        self.listening_since = if next == VoiceState::Listening { Some(Instant::now()) } else { None };
        self.sink.on_state(next).await;
        Ok(())
    }

    /// A future that resolves once `listen_timeout` has elapsed since
    /// `Listening` was (re-)entered, or never resolves otherwise.
    async fn listen_timeout_elapsed(&self) {
        match self.listening_since {
            Some(since) => {
                let remaining = self.listen_timeout.saturating_sub(since.elapsed());
                tokio::time::sleep(remaining).await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Run the pipeline until `cancel` fires. Consumes raw PCM frames from
    /// the recorder, routing them through wake-word detection while idle
    /// and through the VAD while listening, then drives the
    /// STT -> thinker -> TTS chain for each completed segment.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        if self.mode == ConversationMode::Off {
            info!("voice pipeline disabled (mode=off)");
            return Ok(());
        }

        let mut frames = self.recorder.start().await?;
        if self.mode == ConversationMode::AlwaysOn {
            self.apply(&VoiceEvent::StartListening).await.ok();
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("voice pipeline cancelled");
                    break;
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        warn!("recorder stream ended");
                        break;
                    };
                    self.on_frame(frame).await?;
                }
                _ = self.listen_timeout_elapsed() => {
                    if self.state == VoiceState::Listening {
                        warn!("listening auto-stop timer elapsed");
                        self.segment_buf.clear();
                        self.apply(&VoiceEvent::ListenTimeout).await.ok();
                    }
                }
            }
        }

        self.recorder.stop().await?;
        Ok(())
    }

    async fn on_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        match self.state {
            VoiceState::Idle => {
                if self.mode == ConversationMode::WakeWord && self.wake_word.push_frame(&frame) {
                    self.apply(&VoiceEvent::WakeWordDetected).await.ok();
                }
            }
            VoiceState::Listening => {
                self.segment_buf.extend_from_slice(&frame);
                let energy = rms_energy(&frame);
                if let Some(VadEvent::SpeechEnd { duration }) =
                    self.vad.push_frame(energy, FRAME_DURATION)
                {
                    debug!(?duration, "speech segment complete");
                    self.apply(&VoiceEvent::SpeechEnded).await.ok();
                    self.run_turn().await?;
                }
            }
            VoiceState::Processing | VoiceState::Thinking | VoiceState::Speaking => {
                // A turn is in flight; frames captured during this window
                // are discarded except for the interrupt check, which the
                // caller drives explicitly via `interrupt()`.
            }
        }
        Ok(())
    }

    /// Drive one full Processing -> Thinking -> Speaking cycle for the
    /// segment accumulated in `segment_buf`.
    async fn run_turn(&mut self) -> anyhow::Result<()> {
        let audio = Bytes::from(std::mem::take(&mut self.segment_buf));
        let transcript = if self.cancel.is_cancelled() {
            None
        } else {
            let request = TranscribeRequest {
                audio,
                sample_rate_hz: SAMPLE_RATE_HZ,
                language: None,
            };
            match self.stt.transcribe(request).await {
                Ok(t) if !t.text.trim().is_empty() => Some(t.text),
                Ok(_) => None,
                Err(err) => {
                    warn!(%err, "transcription failed");
                    self.sink.on_error(format!("transcription failed: {err}")).await;
                    None
                }
            }
        };
        self.apply(&VoiceEvent::TranscriptReady(transcript.clone()))
            .await
            .ok();
        self.sink.on_transcript(transcript.clone()).await;
        let Some(transcript) = transcript else {
            return Ok(());
        };

        let reply = match self.thinker.think(&transcript).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                warn!(%err, "thinker failed");
                self.sink.on_error(format!("thinker failed: {err}")).await;
                None
            }
        };
        self.apply(&VoiceEvent::ThinkerResponseReady(reply.clone()))
            .await
            .ok();
        let Some(reply) = reply else {
            return Ok(());
        };

        self.speak(reply).await?;
        self.apply(&VoiceEvent::PlaybackDrained).await.ok();
        Ok(())
    }

    async fn speak(&mut self, text: String) -> anyhow::Result<()> {
        let request = SynthesizeRequest {
            text,
            voice_id: self.voice_id.clone(),
            output_format: AudioFormat::Pcm,
        };
        let mut stream = self.tts.synthesize(request).await?;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                chunk = stream.recv() => {
                    match chunk {
                        Some(AudioChunk::Data(bytes)) => self.player.play(bytes).await?,
                        Some(AudioChunk::Done) | None => break,
                        Some(AudioChunk::Error(err)) => {
                            warn!(%err, "tts stream error");
                            self.sink.on_error(format!("tts stream error: {err}")).await;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Direct TTS injection (`voice.speak`): plays `text` through the same
    /// TTS/player chain a turn uses, without going through the turn-taking
    /// state machine. Side-channel announcements don't contend with the
    /// `Listening`/`Processing`/`Thinking` lifecycle of an in-flight turn.
    pub async fn speak_now(&mut self, text: String) -> anyhow::Result<()> {
        self.speak(text).await
    }

    /// Explicit interrupt: stop any in-flight playback and fall back to
    /// idle (or listening, in always-on mode).
    pub async fn interrupt(&mut self) -> anyhow::Result<()> {
        if self.state == VoiceState::Speaking {
            self.player.interrupt().await?;
            self.apply(&VoiceEvent::Interrupt).await.ok();
        }
        Ok(())
    }
}

fn rms_energy(frame: &Bytes) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame
        .chunks_exact(2)
        .map(|c| {
            let sample = i16::from_le_bytes([c[0], c[1]]) as f64 / i16::MAX as f64;
            sample * sample
        })
        .sum();
    let n = (frame.len() / 2).max(1) as f64;
    ((sum_sq / n).sqrt()) as f32
}

/// Serializes pipeline access for callers that need shared ownership (the
/// gateway holds one pipeline per active device and dispatches
/// `voice.interrupt` calls onto it from the WebSocket handler task).
pub type SharedPipeline = Arc<Mutex<VoicePipeline>>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{NullPlayer, NullRecorder};
    use crate::stt::NullSttProvider;
    use crate::tts::NullTtsProvider;
    use crate::wake_word::ThresholdWakeWordDetector;

    #[test]
    fn rms_energy_of_silence_is_zero() {
        let silence = Bytes::from(vec![0u8; 40]);
        assert_eq!(rms_energy(&silence), 0.0);
    }

    #[test]
    fn rms_energy_of_full_scale_tone_is_near_one() {
        let loud = Bytes::from(vec![0xff, 0x7f].repeat(20));
        assert!(rms_energy(&loud) > 0.9);
    }

    struct StubThinker;

    #[async_trait::async_trait]
    impl Thinker for StubThinker {
        async fn think(&self, _transcript: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn stuck_open_microphone_auto_stops_without_speech_end() {
        let cancel = CancellationToken::new();
        let mut pipeline = VoicePipeline::new(
            PipelineConfig {
                mode: ConversationMode::AlwaysOn,
                vad: VadConfig::default(),
                wake_phrases: vec![],
                wake_sensitivity: 0.5,
                voice_id: None,
                listen_timeout: Duration::from_millis(10),
            },
            Box::new(ThresholdWakeWordDetector::new(vec![], 0.5)),
            Box::new(NullRecorder),
            Box::new(NullPlayer),
            Arc::new(NullSttProvider),
            Arc::new(StubThinker),
            Arc::new(NullTtsProvider),
            cancel.clone(),
        );

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { pipeline.run().await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        run_cancel.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
