//! The voice pipeline's state machine. One `VoiceState` is live per active
//! voice session; transitions are driven by `VoiceEvent`s raised by the VAD,
//! wake-word detector, STT/Thinker/TTS stages, and explicit user action.

use conduit_config::ConversationMode;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Processing,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// Wake-word model matched while idle (wake-word mode only).
    WakeWordDetected,
    /// Push-to-talk key pressed, or an explicit `voice.listen.start` call.
    StartListening,
    /// VAD reported the end of a speech segment.
    SpeechEnded,
    /// The auto-stop timer elapsed while listening with no speech end —
    /// a stuck-open microphone. In always-on mode this just restarts the
    /// listening window; anywhere else it returns to idle.
    ListenTimeout,
    /// STT finished; `None` means the segment transcribed to nothing
    /// usable and the turn should be abandoned.
    TranscriptReady(Option<String>),
    /// Thinker finished; `None` means no reply should be spoken.
    ThinkerResponseReady(Option<String>),
    /// TTS playback finished draining.
    PlaybackDrained,
    /// Explicit interrupt; the only thing allowed to preempt `speaking`.
    Interrupt,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event not valid in state {state:?} under mode {mode:?}")]
    Invalid {
        state: VoiceState,
        mode: ConversationMode,
    },
}

impl VoiceState {
    /// Apply one event, yielding the next state. Invariants enforced here:
    /// only one speech-buffer accumulation (`Listening`) is ever live at a
    /// time, every transcript must pass through `Processing` before
    /// `Thinking`, and `Speaking` is preempted only by `Interrupt`.
    pub fn transition(
        self,
        mode: ConversationMode,
        event: &VoiceEvent,
    ) -> Result<VoiceState, TransitionError> {
        use VoiceEvent as E;
        use VoiceState as S;

        if mode == ConversationMode::Off {
            return Err(TransitionError::Invalid { state: self, mode });
        }

        let next = match (self, event) {
            (S::Idle, E::WakeWordDetected) if mode == ConversationMode::WakeWord => S::Listening,
            (S::Idle, E::StartListening)
                if matches!(
                    mode,
                    ConversationMode::PushToTalk | ConversationMode::AlwaysOn
                ) =>
            {
                S::Listening
            }
            (S::Listening, E::SpeechEnded) => S::Processing,
            (S::Listening, E::ListenTimeout) => {
                if mode == ConversationMode::AlwaysOn {
                    S::Listening
                } else {
                    S::Idle
                }
            }
            (S::Processing, E::TranscriptReady(Some(_))) => S::Thinking,
            (S::Processing, E::TranscriptReady(None)) => S::Idle,
            (S::Thinking, E::ThinkerResponseReady(Some(_))) => S::Speaking,
            (S::Thinking, E::ThinkerResponseReady(None)) => S::Idle,
            (S::Speaking, E::PlaybackDrained) => {
                if mode == ConversationMode::AlwaysOn {
                    S::Listening
                } else {
                    S::Idle
                }
            }
            (S::Speaking, E::Interrupt) => S::Idle,
            _ => return Err(TransitionError::Invalid { state: self, mode }),
        };
        Ok(next)
    }
}
