//! Voice processing module
//!
//! Input side: microphone capture, utterance detection, and speech-to-text,
//! behind [`QuestionSource`]. Output side: text-to-speech, playback, and
//! audio cues, behind [`Speaker`].

mod capture;
mod cues;
mod playback;
mod recorder;
mod resample;
mod speech;
mod stt;
mod tts;
mod vad;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use capture::{AudioCapture, AudioInput, SAMPLE_RATE, samples_to_wav};
pub use cues::{AudioCue, CueBank};
pub use playback::{AudioPlayback, AudioSink, Clip, decode_mp3, tone};
pub use recorder::{ListenLimits, Utterance, VoiceInput, record_utterance};
pub use resample::resample;
pub use speech::SpeechOutput;
pub use stt::{SpeechToText, Transcriber};
pub use tts::{Synthesizer, TextToSpeech};
pub use vad::{UtteranceDetector, VadConfig, VadState, calculate_energy};

/// Why no question could be taken from the microphone
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("no speech detected")]
    NoSpeechDetected,

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("voice input timed out")]
    TimedOut,

    #[error("voice input cancelled")]
    Cancelled,
}

/// Produces the user's spoken question
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Record and transcribe one question
    ///
    /// # Errors
    ///
    /// Returns a `VoiceError` describing why no question was obtained
    async fn record_question(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, VoiceError>;
}

/// How an utterance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Finished,
    Cancelled,
    /// Synthesis or playback failed; a warning tone was played instead
    Failed(String),
}

/// Resolves when a `speak` call has finished playing
#[derive(Debug)]
pub struct SpeechTicket {
    rx: oneshot::Receiver<SpeechOutcome>,
}

impl SpeechTicket {
    #[must_use]
    pub const fn from_receiver(rx: oneshot::Receiver<SpeechOutcome>) -> Self {
        Self { rx }
    }

    /// A ticket that is already resolved
    #[must_use]
    pub fn ready(outcome: SpeechOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }
}

impl Future for SpeechTicket {
    type Output = SpeechOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(SpeechOutcome::Cancelled))
    }
}

/// Speaks text and plays cues; never blocks the caller
pub trait Speaker: Send + Sync {
    /// Speak `text`, optionally preceded by a cue, interrupting anything already spoken
    fn speak(&self, text: &str, lead_in: Option<AudioCue>) -> SpeechTicket;

    /// Play a cue without interrupting speech
    fn cue(&self, cue: AudioCue);

    /// Stop all speech and cues immediately
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_sender_resolves_as_cancelled() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        assert_eq!(SpeechTicket::from_receiver(rx).await, SpeechOutcome::Cancelled);
    }

    #[tokio::test]
    async fn ready_ticket_resolves_immediately() {
        assert_eq!(
            SpeechTicket::ready(SpeechOutcome::Finished).await,
            SpeechOutcome::Finished
        );
    }
}
