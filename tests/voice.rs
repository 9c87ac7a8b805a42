//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lookout::voice::{
    AudioCue, AudioInput, AudioSink, Clip, CueBank, ListenLimits, SAMPLE_RATE, Speaker,
    SpeechOutcome, SpeechOutput, Synthesizer, UtteranceDetector, VadConfig, VadState, VoiceError,
    calculate_energy, record_utterance, resample, samples_to_wav,
};

mod common;

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Microphone stand-in that hands out 100ms chunks of a prepared signal
struct ScriptedMic {
    chunks: VecDeque<Vec<f32>>,
}

impl ScriptedMic {
    fn new(signal: &[f32]) -> Self {
        let chunk = SAMPLE_RATE as usize / 10;
        Self {
            chunks: signal.chunks(chunk).map(<[f32]>::to_vec).collect(),
        }
    }
}

impl AudioInput for ScriptedMic {
    fn take_samples(&mut self) -> Vec<f32> {
        self.chunks.pop_front().unwrap_or_default()
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

fn fast_limits() -> ListenLimits {
    ListenLimits {
        calibration: Duration::from_millis(200),
        listen_timeout: Duration::from_secs(2),
        max_phrase: Duration::from_secs(5),
        poll: Duration::from_millis(1),
        vad: VadConfig::default(),
    }
}

// -- detection --

#[test]
fn test_speech_activity_detection() {
    let mut detector = UtteranceDetector::new(&VadConfig::default(), SAMPLE_RATE);

    assert_eq!(detector.process(&generate_silence(0.1)), VadState::Waiting);
    assert_eq!(
        detector.process(&generate_sine_samples(440.0, 0.1, 0.5)),
        VadState::Speaking
    );
}

#[test]
fn test_utterance_complete_detection() {
    let mut detector = UtteranceDetector::new(&VadConfig::default(), SAMPLE_RATE);
    let chunk = SAMPLE_RATE as usize / 10;

    detector.process(&generate_silence(0.1));
    for _ in 0..5 {
        detector.process(&generate_sine_samples(440.0, 0.1, 0.5));
    }
    for _ in 0..8 {
        detector.process(&generate_silence(0.1));
    }

    assert_eq!(detector.state(), VadState::Complete);
    assert!(detector.heard_speech());
    // five chunks of speech plus the trailing silence
    assert_eq!(detector.take_speech_buffer().len(), 13 * chunk);
}

#[test]
fn test_calibrated_hum_is_not_speech() {
    let hum = generate_sine_samples(60.0, 0.2, 0.05);
    let mut detector = UtteranceDetector::new(&VadConfig::default(), SAMPLE_RATE);
    detector.calibrate(&hum);

    assert!(detector.threshold() > calculate_energy(&hum));
    assert_eq!(detector.process(&hum), VadState::Waiting);
    assert_eq!(
        detector.process(&generate_sine_samples(440.0, 0.1, 0.5)),
        VadState::Speaking
    );
}

#[test]
fn test_detector_reset() {
    let mut detector = UtteranceDetector::new(&VadConfig::default(), SAMPLE_RATE);
    detector.process(&generate_sine_samples(440.0, 0.1, 0.5));
    assert_eq!(detector.state(), VadState::Speaking);

    detector.reset();
    assert_eq!(detector.state(), VadState::Waiting);
    assert!(detector.take_speech_buffer().is_empty());
}

// -- recording --

#[test]
fn test_record_question_from_scripted_microphone() {
    let mut signal = generate_silence(0.5);
    signal.extend(generate_sine_samples(300.0, 0.8, 0.4));
    signal.extend(generate_silence(1.0));
    let mut mic = ScriptedMic::new(&signal);

    let utterance = record_utterance(&mut mic, &fast_limits(), &CancellationToken::new()).unwrap();
    assert!(utterance.duration() >= Duration::from_millis(800));

    let wav = utterance.to_wav().unwrap();
    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len() as usize, utterance.samples.len());
}

#[test]
fn test_quiet_room_is_no_speech() {
    let mut mic = ScriptedMic::new(&generate_silence(3.0));
    let result = record_utterance(&mut mic, &fast_limits(), &CancellationToken::new());
    assert_eq!(result, Err(VoiceError::NoSpeechDetected));
}

// -- wav --

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // WAV header is 44 bytes, 16-bit samples
    assert_eq!(wav.len(), 44 + samples.len() * 2);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
}

#[test]
fn test_wav_roundtrip() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let cursor = Cursor::new(wav);
    let mut reader = hound::WavReader::new(cursor).unwrap();
    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();

    assert_eq!(decoded.len(), samples.len());
    for (original, decoded) in samples.iter().zip(&decoded) {
        let restored = f32::from(*decoded) / 32767.0;
        assert!((original - restored).abs() < 0.001);
    }
}

#[test]
fn test_resample_keeps_duration() {
    let samples = generate_sine_samples(440.0, 0.5, 0.5);
    let resampled = resample(&samples, SAMPLE_RATE, 24_000).unwrap();
    assert_eq!(resampled.len(), samples.len() * 3 / 2);
}

// -- speech output --

/// Sink that returns immediately, recording clip lengths
#[derive(Default)]
struct RecordingSink {
    played: Mutex<Vec<usize>>,
}

impl AudioSink for RecordingSink {
    fn play(&self, clip: &Clip, _cancel: &CancellationToken) -> lookout::Result<()> {
        self.played.lock().unwrap().push(clip.samples.len());
        Ok(())
    }
}

/// Synthesizer returning bytes that are not audio
struct GarbageSynth;

#[async_trait]
impl Synthesizer for GarbageSynth {
    async fn synthesize(&self, _text: &str) -> lookout::Result<Vec<u8>> {
        Ok(b"definitely not mp3".to_vec())
    }
}

#[tokio::test]
async fn test_undecodable_speech_falls_back_to_warning() {
    let sink = Arc::new(RecordingSink::default());
    let output = SpeechOutput::new(Arc::new(GarbageSynth), sink.clone(), CueBank::builtin());

    let outcome = tokio::time::timeout(
        common::WAIT,
        output.speak("A curb is ahead.", Some(AudioCue::Success)),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, SpeechOutcome::Failed(_)));

    let cues = CueBank::builtin();
    assert_eq!(
        *sink.played.lock().unwrap(),
        vec![
            cues.clip(AudioCue::Success).samples.len(),
            cues.clip(AudioCue::Warning).samples.len(),
        ]
    );
}

#[tokio::test]
async fn test_cue_plays_through_sink() {
    let sink = Arc::new(RecordingSink::default());
    let output = SpeechOutput::new(Arc::new(GarbageSynth), sink.clone(), CueBank::builtin());

    output.cue(AudioCue::Thinking);

    let expected = CueBank::builtin().clip(AudioCue::Thinking).samples.len();
    tokio::time::timeout(common::WAIT, async {
        while sink.played.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*sink.played.lock().unwrap(), vec![expected]);
}
