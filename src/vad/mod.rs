//! Voice-activity detection.
//!
//! Streaming energy estimator with hysteresis: enters SPEECH after
//! `start_ms` of continuous activity, leaves SPEECH after
//! `min_silence_ms` of continuous silence. Audio prior to SPEECH entry
//! is buffered for `pad_ms` and prepended to the emitted utterance.

use std::collections::VecDeque;

use crate::config::VadConfig;

/// One ~32ms analysis window's worth of samples is the expected chunk
/// size from the Transport; the gate does not assume a specific size.
const DEFAULT_THRESHOLD: f32 = 0.02;

/// Output of processing one audio chunk.
#[derive(Debug, Clone)]
pub struct VadOutput {
    /// A new speech segment started on this chunk.
    pub speech_started: bool,
    /// Chunk classified as speech.
    pub is_speech: bool,
    /// A speech segment completed on this chunk (silence hold-off elapsed).
    pub segment: Option<Vec<i16>>,
}

/// Energy-threshold voice-activity gate with pre-roll buffering.
pub struct VadGate {
    threshold: f32,
    pre_roll: VecDeque<i16>,
    pre_roll_max: usize,
    speech_buffer: Vec<i16>,
    in_speech: bool,
    active_samples: usize,
    active_samples_threshold: usize,
    silence_samples: usize,
    silence_samples_threshold: usize,
}

impl VadGate {
    #[must_use]
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        let silence_samples_threshold =
            (config.min_silence_ms as usize * sample_rate as usize) / 1000;
        let active_samples_threshold = (config.start_ms as usize * sample_rate as usize) / 1000;
        let pre_roll_max = (config.pad_ms as usize * sample_rate as usize) / 1000;

        Self {
            threshold: DEFAULT_THRESHOLD,
            pre_roll: VecDeque::with_capacity(pre_roll_max),
            pre_roll_max,
            speech_buffer: Vec::new(),
            in_speech: false,
            active_samples: 0,
            active_samples_threshold,
            silence_samples: 0,
            silence_samples_threshold,
        }
    }

    /// Feed one chunk of PCM16 samples.
    pub fn process_chunk(&mut self, samples: &[i16]) -> VadOutput {
        let rms = compute_rms(samples);
        let chunk_is_speech = rms > self.threshold;

        if self.pre_roll_max > 0 {
            self.pre_roll.extend(samples.iter().copied());
            while self.pre_roll.len() > self.pre_roll_max {
                self.pre_roll.pop_front();
            }
        }

        let mut speech_started = false;
        let mut completed = None;

        if chunk_is_speech {
            self.silence_samples = 0;
            if !self.in_speech {
                self.active_samples = self.active_samples.saturating_add(samples.len());
                if self.active_samples >= self.active_samples_threshold {
                    self.in_speech = true;
                    speech_started = true;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend(self.pre_roll.iter().copied());
                    self.active_samples = 0;
                }
            }
            if self.in_speech {
                self.speech_buffer.extend_from_slice(samples);
            }
        } else {
            self.active_samples = 0;
            if self.in_speech {
                self.speech_buffer.extend_from_slice(samples);
                self.silence_samples = self.silence_samples.saturating_add(samples.len());
                if self.silence_samples >= self.silence_samples_threshold {
                    self.in_speech = false;
                    self.silence_samples = 0;
                    completed = Some(std::mem::take(&mut self.speech_buffer));
                }
            }
        }

        VadOutput {
            speech_started,
            is_speech: self.in_speech,
            segment: completed,
        }
    }

    #[must_use]
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Reset all state — used between turns so pre-roll from a prior
    /// utterance never leaks into the next one.
    pub fn reset(&mut self) {
        self.pre_roll.clear();
        self.speech_buffer.clear();
        self.in_speech = false;
        self.active_samples = 0;
        self.silence_samples = 0;
    }
}

fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt() / i16::MAX as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    fn loud(n: usize) -> Vec<i16> {
        vec![20_000; n]
    }

    #[test]
    fn silence_only_utterance_never_enters_speech() {
        let config = VadConfig {
            min_silence_ms: 50,
            start_ms: 20,
            pad_ms: 0,
        };
        let mut gate = VadGate::new(&config, 16_000);
        for _ in 0..10 {
            let out = gate.process_chunk(&silent(320));
            assert!(!out.speech_started);
            assert!(out.segment.is_none());
        }
    }

    #[test]
    fn speech_then_silence_emits_one_segment() {
        let config = VadConfig {
            min_silence_ms: 50,
            start_ms: 20,
            pad_ms: 0,
        };
        let mut gate = VadGate::new(&config, 16_000);

        // Enough loud samples to cross start_ms threshold.
        let mut started = false;
        for _ in 0..5 {
            let out = gate.process_chunk(&loud(320));
            started |= out.speech_started;
        }
        assert!(started);

        // Enough silence to cross min_silence_ms threshold.
        let mut segment = None;
        for _ in 0..10 {
            let out = gate.process_chunk(&silent(320));
            if out.segment.is_some() {
                segment = out.segment;
                break;
            }
        }
        assert!(segment.is_some());
    }

    #[test]
    fn pre_roll_is_prepended_to_segment() {
        let config = VadConfig {
            min_silence_ms: 50,
            start_ms: 20,
            pad_ms: 20,
        };
        let mut gate = VadGate::new(&config, 16_000);
        // Feed some silence first to fill pre-roll.
        gate.process_chunk(&silent(320));
        let pre_roll_len_before = gate.pre_roll.len();
        assert!(pre_roll_len_before > 0);

        for _ in 0..5 {
            gate.process_chunk(&loud(320));
        }
        // speech_buffer should include the pre-roll silence prefix.
        assert!(gate.speech_buffer.len() > 320 * 5);
    }

    #[test]
    fn reset_clears_in_progress_segment() {
        let config = VadConfig::default();
        let mut gate = VadGate::new(&config, 16_000);
        gate.process_chunk(&loud(1600));
        gate.reset();
        assert!(!gate.in_speech());
    }
}
