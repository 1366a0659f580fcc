//! Voice I/O for conduit: capture, VAD, wake-word, STT/TTS provider
//! abstractions, the turn-taking state machine, and the pipeline that wires
//! them together.

pub mod io;
pub mod pipeline;
pub mod sink;
pub mod state;
pub mod stt;
pub mod tts;
pub mod vad;
pub mod wake_word;

pub use {
    io::{NullPlayer, NullRecorder, Player, Recorder},
    pipeline::{PipelineConfig, SharedPipeline, Thinker, VoicePipeline},
    sink::{NullVoiceEventSink, VoiceEventSink},
    state::{TransitionError, VoiceEvent, VoiceState},
    stt::{NullSttProvider, SttProvider, TranscribeRequest, Transcript},
    tts::{AudioChunk, AudioFormat, AudioStream, NullTtsProvider, SynthesizeRequest, TtsProvider},
    vad::{Vad, VadEvent},
    wake_word::{ThresholdWakeWordDetector, WakeWordDetector},
};
