//! Records one spoken question and transcribes it

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::capture::{AudioCapture, AudioInput, SAMPLE_RATE, samples_to_wav};
use super::resample::resample;
use super::stt::Transcriber;
use super::vad::{UtteranceDetector, VadConfig, VadState};
use super::{QuestionSource, VoiceError};
use crate::config::VoiceConfig;

/// Bounds on a single recording
#[derive(Debug, Clone, PartialEq)]
pub struct ListenLimits {
    /// Ambient noise sampled before listening
    pub calibration: Duration,
    /// Wait for speech to start before giving up
    pub listen_timeout: Duration,
    /// Longest phrase recorded
    pub max_phrase: Duration,
    /// How often the input is drained
    pub poll: Duration,
    pub vad: VadConfig,
}

impl ListenLimits {
    #[must_use]
    pub fn from_config(voice: &VoiceConfig) -> Self {
        Self {
            calibration: voice.calibration,
            listen_timeout: voice.listen_timeout,
            max_phrase: voice.max_phrase,
            poll: Duration::from_millis(50),
            vad: VadConfig {
                end_silence: voice.silence,
                ..VadConfig::default()
            },
        }
    }

    /// Wall-clock bound covering every phase, for inputs that stall
    fn deadline(&self) -> Duration {
        self.calibration + self.listen_timeout + self.max_phrase + Duration::from_secs(2)
    }
}

/// Recorded phrase, mono at [`SAMPLE_RATE`]
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
}

impl Utterance {
    /// Encode as 16-bit WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> crate::Result<Vec<u8>> {
        samples_to_wav(&self.samples, SAMPLE_RATE)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(SAMPLE_RATE))
    }
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    usize::try_from(duration.as_millis() * u128::from(sample_rate) / 1000).unwrap_or(usize::MAX)
}

/// Record until the phrase ends, blocking the calling thread
///
/// Phases are measured in samples received, so timing follows the audio
/// itself; a wall-clock deadline guards against an input that stops
/// delivering.
///
/// # Errors
///
/// - `Cancelled` when `cancel` fires; partial audio is discarded
/// - `NoSpeechDetected` when the listen timeout passes without a phrase
/// - `DeviceUnavailable` when the input stalls
pub fn record_utterance<A: AudioInput>(
    input: &mut A,
    limits: &ListenLimits,
    cancel: &CancellationToken,
) -> Result<Utterance, VoiceError> {
    let rate = input.sample_rate();
    let calibration_samples = samples_for(limits.calibration, rate);
    let listen_samples = samples_for(limits.listen_timeout, rate);
    let phrase_samples = samples_for(limits.max_phrase, rate);

    let mut detector = UtteranceDetector::new(&limits.vad, rate);
    let mut ambient = Vec::with_capacity(calibration_samples);
    let mut calibrated = calibration_samples == 0;
    // samples since listening began, and since speech began
    let mut waited = 0usize;
    let mut spoken = 0usize;

    let started = Instant::now();
    let deadline = limits.deadline();

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("recording cancelled");
            return Err(VoiceError::Cancelled);
        }
        if started.elapsed() > deadline {
            return Err(VoiceError::DeviceUnavailable(
                "microphone stopped delivering audio".to_string(),
            ));
        }

        std::thread::sleep(limits.poll);
        let mut chunk = input.take_samples();
        if chunk.is_empty() {
            continue;
        }

        if !calibrated {
            let needed = calibration_samples - ambient.len();
            let take = needed.min(chunk.len());
            ambient.extend(chunk.drain(..take));
            if ambient.len() >= calibration_samples {
                detector.calibrate(&ambient);
                calibrated = true;
                tracing::debug!("listening");
            }
            if chunk.is_empty() {
                continue;
            }
        }

        let state = detector.process(&chunk);
        match state {
            VadState::Complete => break,
            VadState::Speaking => {
                spoken += chunk.len();
                if spoken >= phrase_samples {
                    tracing::debug!("phrase limit reached");
                    break;
                }
            }
            VadState::Waiting => {
                spoken = 0;
                waited += chunk.len();
                if waited >= listen_samples {
                    return Err(VoiceError::NoSpeechDetected);
                }
            }
        }
    }

    if !detector.heard_speech() {
        return Err(VoiceError::NoSpeechDetected);
    }

    let samples = detector.take_speech_buffer();
    let samples = resample(&samples, rate, SAMPLE_RATE)
        .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;

    let utterance = Utterance { samples };
    tracing::debug!(secs = utterance.duration().as_secs_f32(), "utterance recorded");
    Ok(utterance)
}

/// Microphone plus speech-to-text
pub struct VoiceInput {
    transcriber: Arc<dyn Transcriber>,
    limits: ListenLimits,
}

impl VoiceInput {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, limits: ListenLimits) -> Self {
        Self {
            transcriber,
            limits,
        }
    }

    async fn record_and_transcribe(&self, cancel: CancellationToken) -> Result<String, VoiceError> {
        let limits = self.limits.clone();
        let recording_cancel = cancel.clone();

        let utterance = tokio::task::spawn_blocking(move || {
            let mut mic = AudioCapture::open()
                .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
            record_utterance(&mut mic, &limits, &recording_cancel)
            // mic dropped here, releasing the device
        })
        .await
        .map_err(|e| VoiceError::DeviceUnavailable(format!("recorder task failed: {e}")))??;

        let wav = utterance
            .to_wav()
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;

        let transcript = tokio::select! {
            () = cancel.cancelled() => return Err(VoiceError::Cancelled),
            result = self.transcriber.transcribe(&wav) => {
                result.map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?
            }
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(VoiceError::TranscriptionFailed(
                "no words recognized".to_string(),
            ));
        }

        Ok(transcript.to_string())
    }
}

#[async_trait]
impl QuestionSource for VoiceInput {
    async fn record_question(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, VoiceError> {
        let local = cancel.child_token();
        // stops the blocking recorder however this future ends
        let _guard = local.clone().drop_guard();

        match tokio::time::timeout(timeout, self.record_and_transcribe(local)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "voice input timed out");
                Err(VoiceError::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    /// Scripted input yielding one chunk per poll
    struct FakeInput {
        chunks: std::collections::VecDeque<Vec<f32>>,
        rate: u32,
    }

    impl FakeInput {
        fn new(rate: u32, pattern: &[(f32, usize)]) -> Self {
            let per_chunk = rate as usize / 10;
            let mut chunks = std::collections::VecDeque::new();
            for &(level, count) in pattern {
                for _ in 0..count {
                    chunks.push_back(vec![level; per_chunk]);
                }
            }
            Self { chunks, rate }
        }
    }

    impl AudioInput for FakeInput {
        fn take_samples(&mut self) -> Vec<f32> {
            self.chunks.pop_front().unwrap_or_default()
        }

        fn sample_rate(&self) -> u32 {
            self.rate
        }
    }

    fn limits() -> ListenLimits {
        ListenLimits {
            calibration: Duration::from_millis(200),
            listen_timeout: Duration::from_millis(1000),
            max_phrase: Duration::from_millis(3000),
            poll: Duration::from_millis(1),
            vad: VadConfig::default(),
        }
    }

    #[test]
    fn records_a_phrase() {
        // 200ms calibration, 300ms wait, 600ms speech, 900ms silence
        let mut input = FakeInput::new(RATE, &[(0.0, 2), (0.0, 3), (0.4, 6), (0.0, 9)]);
        let utterance =
            record_utterance(&mut input, &limits(), &CancellationToken::new()).unwrap();

        assert!(utterance.duration() >= Duration::from_millis(600));
        assert!(utterance.to_wav().unwrap().starts_with(b"RIFF"));
    }

    #[test]
    fn silence_times_out() {
        let mut input = FakeInput::new(RATE, &[(0.0, 30)]);
        let result = record_utterance(&mut input, &limits(), &CancellationToken::new());
        assert_eq!(result, Err(VoiceError::NoSpeechDetected));
    }

    #[test]
    fn phrase_limit_bounds_recording() {
        let mut input = FakeInput::new(RATE, &[(0.0, 2), (0.4, 60)]);
        let utterance =
            record_utterance(&mut input, &limits(), &CancellationToken::new()).unwrap();
        assert!(utterance.duration() <= Duration::from_millis(3100));
    }

    #[test]
    fn cancel_discards_audio() {
        let mut input = FakeInput::new(RATE, &[(0.4, 30)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            record_utterance(&mut input, &limits(), &cancel),
            Err(VoiceError::Cancelled)
        );
    }

    #[test]
    fn device_rate_is_resampled() {
        let mut input = FakeInput::new(48_000, &[(0.0, 2), (0.4, 6), (0.0, 9)]);
        let utterance =
            record_utterance(&mut input, &limits(), &CancellationToken::new()).unwrap();
        // 600ms speech + 800ms trailing silence, at 16kHz
        assert_eq!(utterance.samples.len(), 1400 * RATE as usize / 1000);
    }

    #[test]
    fn stalled_input_is_a_device_error() {
        let mut input = FakeInput::new(RATE, &[]);
        let limits = ListenLimits {
            calibration: Duration::ZERO,
            listen_timeout: Duration::from_millis(10),
            max_phrase: Duration::from_millis(10),
            ..limits()
        };
        assert!(matches!(
            record_utterance(&mut input, &limits, &CancellationToken::new()),
            Err(VoiceError::DeviceUnavailable(_))
        ));
    }
}
