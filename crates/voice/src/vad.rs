//! Energy-based voice activity detection with an adaptive noise floor and
//! hysteresis on both edges of a speech segment.

use std::collections::VecDeque;
use std::time::Duration;

use conduit_config::VadConfig;

const ADAPTIVE_WINDOW: usize = 50;
const ADAPTIVE_PERCENTILE: f32 = 0.20;
const ADAPTIVE_GAIN: f32 = 2.0;

/// Internal detector state. Distinct from the pipeline-level `VoiceState`:
/// this only tracks whether the current frame is above or below the floor,
/// with hysteresis to avoid flapping on noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Silence,
    MaybeSpeech,
    Speech,
    MaybeSilence,
}

/// Emitted when a frame crosses a debounced edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    SpeechStart,
    /// Carries the duration of the segment that just ended.
    SpeechEnd { duration: Duration },
}

/// Frame-by-frame energy detector. Feed it one RMS energy value per frame
/// (in arrival order) via [`Vad::push_frame`].
pub struct Vad {
    config: VadConfig,
    edge: Edge,
    edge_since: Duration,
    elapsed: Duration,
    speech_started_at: Option<Duration>,
    recent_energies: VecDeque<f32>,
    adaptive_floor: f32,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        let floor = config.energy_threshold;
        Self {
            config,
            edge: Edge::Silence,
            edge_since: Duration::ZERO,
            elapsed: Duration::ZERO,
            speech_started_at: None,
            recent_energies: VecDeque::with_capacity(ADAPTIVE_WINDOW),
            adaptive_floor: floor,
        }
    }

    /// Current energy floor a frame must exceed to count as speech.
    pub fn floor(&self) -> f32 {
        self.adaptive_floor.max(self.config.energy_threshold)
    }

    fn is_speaking(&self) -> bool {
        matches!(self.edge, Edge::Speech | Edge::MaybeSilence)
    }

    fn record_energy_for_adaptation(&mut self, energy: f32) {
        // Freeze adaptation while any part of a speech segment is active so
        // the floor doesn't chase the speaker's own voice upward.
        if self.is_speaking() {
            return;
        }
        if self.recent_energies.len() == ADAPTIVE_WINDOW {
            self.recent_energies.pop_front();
        }
        self.recent_energies.push_back(energy);
        if self.recent_energies.len() < ADAPTIVE_WINDOW / 2 {
            return;
        }
        let mut sorted: Vec<f32> = self.recent_energies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f32) * ADAPTIVE_PERCENTILE) as usize;
        let percentile = sorted.get(idx).copied().unwrap_or(0.0);
        self.adaptive_floor = percentile * ADAPTIVE_GAIN;
    }

    /// Feed one frame. `frame_duration` is how much audio this frame spans;
    /// it advances the detector's internal clock used for hysteresis timing.
    pub fn push_frame(&mut self, energy: f32, frame_duration: Duration) -> Option<VadEvent> {
        self.elapsed += frame_duration;
        self.record_energy_for_adaptation(energy);

        let above = energy >= self.floor();
        let speech_confirm = Duration::from_millis(self.config.speech_confirm_ms);
        let silence_confirm = Duration::from_millis(self.config.silence_confirm_ms);
        let min_speech = Duration::from_millis(self.config.min_speech_ms);

        match self.edge {
            Edge::Silence => {
                if above {
                    self.edge = Edge::MaybeSpeech;
                    self.edge_since = self.elapsed;
                }
                None
            }
            Edge::MaybeSpeech => {
                if !above {
                    self.edge = Edge::Silence;
                    None
                } else if self.elapsed - self.edge_since >= speech_confirm {
                    self.edge = Edge::Speech;
                    self.speech_started_at = Some(self.elapsed);
                    Some(VadEvent::SpeechStart)
                } else {
                    None
                }
            }
            Edge::Speech => {
                if !above {
                    self.edge = Edge::MaybeSilence;
                    self.edge_since = self.elapsed;
                }
                None
            }
            Edge::MaybeSilence => {
                if above {
                    self.edge = Edge::Speech;
                    None
                } else if self.elapsed - self.edge_since >= silence_confirm {
                    self.edge = Edge::Silence;
                    let started = self.speech_started_at.take().unwrap_or(self.elapsed);
                    let duration = self.elapsed.saturating_sub(started);
                    if duration < min_speech {
                        // Too short to count; drop it silently, as if the
                        // segment never started.
                        None
                    } else {
                        Some(VadEvent::SpeechEnd { duration })
                    }
                } else {
                    None
                }
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn silence_produces_no_events() {
        let mut vad = Vad::new(VadConfig::default());
        for _ in 0..100 {
            assert_eq!(vad.push_frame(0.001, frame(20)), None);
        }
    }

    #[test]
    fn sustained_loud_frames_emit_speech_start_after_confirm_window() {
        let mut vad = Vad::new(VadConfig {
            speech_confirm_ms: 100,
            ..VadConfig::default()
        });
        // 5 frames @ 20ms = 100ms, so the 6th frame should confirm.
        let mut last = None;
        for _ in 0..6 {
            last = vad.push_frame(1.0, frame(20));
        }
        assert_eq!(last, Some(VadEvent::SpeechStart));
    }

    #[test]
    fn brief_blip_does_not_confirm_speech() {
        let mut vad = Vad::new(VadConfig {
            speech_confirm_ms: 100,
            ..VadConfig::default()
        });
        assert_eq!(vad.push_frame(1.0, frame(20)), None);
        // Drops back to silence before the confirm window elapses.
        assert_eq!(vad.push_frame(0.001, frame(20)), None);
        for _ in 0..10 {
            assert_eq!(vad.push_frame(1.0, frame(20)), None);
        }
    }

    #[test]
    fn short_segment_under_min_speech_is_discarded() {
        let mut vad = Vad::new(VadConfig {
            speech_confirm_ms: 20,
            silence_confirm_ms: 20,
            min_speech_ms: 500,
            ..VadConfig::default()
        });
        // Confirm speech quickly.
        vad.push_frame(1.0, frame(20));
        let start = vad.push_frame(1.0, frame(20));
        assert_eq!(start, Some(VadEvent::SpeechStart));
        // Drop back to silence almost immediately; segment is far under
        // min_speech_ms, so SpeechEnd should be suppressed.
        vad.push_frame(0.001, frame(20));
        let end = vad.push_frame(0.001, frame(20));
        assert_eq!(end, None);
    }

    #[test]
    fn long_segment_emits_speech_end_with_duration() {
        let mut vad = Vad::new(VadConfig {
            speech_confirm_ms: 20,
            silence_confirm_ms: 20,
            min_speech_ms: 50,
            ..VadConfig::default()
        });
        vad.push_frame(1.0, frame(20));
        assert_eq!(vad.push_frame(1.0, frame(20)), Some(VadEvent::SpeechStart));
        for _ in 0..10 {
            vad.push_frame(1.0, frame(20));
        }
        vad.push_frame(0.001, frame(20));
        let end = vad.push_frame(0.001, frame(20));
        assert!(matches!(end, Some(VadEvent::SpeechEnd { .. })));
    }

    #[test]
    fn adaptive_floor_tracks_ambient_noise_but_stays_above_static_threshold() {
        let mut vad = Vad::new(VadConfig {
            energy_threshold: 0.02,
            ..VadConfig::default()
        });
        for _ in 0..60 {
            vad.push_frame(0.005, frame(20));
        }
        assert!(vad.floor() >= 0.02);
    }
}
