//! Wake-word detection. Consumes PCM while the pipeline is idle and signals
//! a transition straight to `listening` on a match; does nothing once the
//! pipeline has already left `idle`.

use bytes::Bytes;

/// A wake-word detector backend. A real implementation wraps a keyword
/// spotting model; tests and headless configurations can supply a stub.
pub trait WakeWordDetector: Send + Sync {
    /// Configured trigger phrases, for diagnostics.
    fn phrases(&self) -> &[String];

    /// Feed one frame of PCM audio captured while idle. Returns `true` if
    /// this frame completed a match against one of the configured phrases.
    fn push_frame(&mut self, frame: &Bytes) -> bool;
}

/// Sensitivity-gated detector stub: matches based on amplitude crossing a
/// threshold derived from `sensitivity` rather than real keyword spotting.
/// Exists so the pipeline can be exercised end-to-end before a real model
/// is wired in.
pub struct ThresholdWakeWordDetector {
    phrases: Vec<String>,
    /// 0.0 (least sensitive) ..= 1.0 (most sensitive).
    sensitivity: f32,
}

impl ThresholdWakeWordDetector {
    pub fn new(phrases: Vec<String>, sensitivity: f32) -> Self {
        Self {
            phrases,
            sensitivity: sensitivity.clamp(0.0, 1.0),
        }
    }

    fn amplitude(frame: &Bytes) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: i64 = frame.iter().map(|&b| i64::from(b.abs_diff(128))).sum();
        (sum as f32) / (frame.len() as f32) / 128.0
    }
}

impl WakeWordDetector for ThresholdWakeWordDetector {
    fn phrases(&self) -> &[String] {
        &self.phrases
    }

    fn push_frame(&mut self, frame: &Bytes) -> bool {
        if self.phrases.is_empty() {
            return false;
        }
        // Higher sensitivity lowers the bar to trigger.
        let threshold = 1.0 - self.sensitivity;
        Self::amplitude(frame) >= threshold
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_phrases_never_triggers() {
        let mut d = ThresholdWakeWordDetector::new(vec![], 1.0);
        assert!(!d.push_frame(&Bytes::from_static(&[255u8; 16])));
    }

    #[test]
    fn high_sensitivity_triggers_on_loud_frame() {
        let mut d = ThresholdWakeWordDetector::new(vec!["hey conduit".into()], 0.9);
        assert!(d.push_frame(&Bytes::from_static(&[255u8; 16])));
    }

    #[test]
    fn low_sensitivity_ignores_quiet_frame() {
        let mut d = ThresholdWakeWordDetector::new(vec!["hey conduit".into()], 0.1);
        assert!(!d.push_frame(&Bytes::from_static(&[128u8; 16])));
    }
}
