//! Energy-based utterance detection
//!
//! Finds one spoken phrase in a microphone stream: speech starts when the
//! RMS energy of a chunk rises above a threshold calibrated from ambient
//! noise, and ends after a run of quiet chunks.

use std::time::Duration;

/// Detector tuning
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Lowest energy threshold, used when the room is silent
    pub energy_floor: f32,
    /// Threshold as a multiple of the ambient noise level
    pub noise_factor: f32,
    /// Speech shorter than this is treated as a click or cough
    pub min_speech: Duration,
    /// Quiet time that ends a phrase
    pub end_silence: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_floor: 0.03,
            noise_factor: 2.5,
            min_speech: Duration::from_millis(300),
            end_silence: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech yet
    Waiting,
    /// Inside a phrase
    Speaking,
    /// Phrase ended by silence
    Complete,
}

/// Detects a single utterance in a stream of mono samples
#[derive(Debug)]
pub struct UtteranceDetector {
    threshold: f32,
    min_speech_samples: usize,
    silence_samples: usize,
    noise_factor: f32,
    state: VadState,
    speech_buffer: Vec<f32>,
    voiced_samples: usize,
    silence_counter: usize,
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    usize::try_from(duration.as_millis() * u128::from(sample_rate) / 1000).unwrap_or(usize::MAX)
}

impl UtteranceDetector {
    #[must_use]
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        Self {
            threshold: config.energy_floor,
            min_speech_samples: samples_for(config.min_speech, sample_rate),
            silence_samples: samples_for(config.end_silence, sample_rate),
            noise_factor: config.noise_factor,
            state: VadState::Waiting,
            speech_buffer: Vec::new(),
            voiced_samples: 0,
            silence_counter: 0,
        }
    }

    /// Raise the threshold above the ambient noise measured in `ambient`
    pub fn calibrate(&mut self, ambient: &[f32]) {
        let noise = calculate_energy(ambient);
        self.threshold = self.threshold.max(noise * self.noise_factor);
        tracing::debug!(noise, threshold = self.threshold, "noise floor calibrated");
    }

    /// Feed the next chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> VadState {
        if samples.is_empty() || self.state == VadState::Complete {
            return self.state;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            VadState::Waiting => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.voiced_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            VadState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.voiced_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter >= self.silence_samples {
                    if self.voiced_samples >= self.min_speech_samples {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        self.state = VadState::Complete;
                    } else {
                        tracing::trace!(voiced = self.voiced_samples, "too short, resetting");
                        self.reset();
                    }
                }
            }
            VadState::Complete => {}
        }

        self.state
    }

    /// Whether enough voiced audio has been heard to count as a phrase
    #[must_use]
    pub const fn heard_speech(&self) -> bool {
        self.voiced_samples >= self.min_speech_samples
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Take the phrase audio, clearing it
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }

    /// Back to waiting, keeping the calibrated threshold
    pub fn reset(&mut self) {
        self.state = VadState::Waiting;
        self.speech_buffer.clear();
        self.voiced_samples = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
