//! Speech output: synthesis, playback, and cues with interruption

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::cues::{AudioCue, CueBank};
use super::playback::{AudioSink, Clip, decode_mp3};
use super::tts::Synthesizer;
use super::{Speaker, SpeechOutcome, SpeechTicket};

#[derive(Debug)]
struct Tokens {
    /// Parent of everything playing; replaced on `cancel`
    generation: CancellationToken,
    /// The utterance currently being spoken
    speech: Option<CancellationToken>,
}

/// Speaks answers through a synthesizer and an audio sink
///
/// At most one utterance plays at a time: `speak` cancels the previous one.
/// Cues play alongside speech and are only stopped by `cancel`.
pub struct SpeechOutput {
    synth: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    cues: Arc<CueBank>,
    tokens: Mutex<Tokens>,
}

impl SpeechOutput {
    #[must_use]
    pub fn new(synth: Arc<dyn Synthesizer>, sink: Arc<dyn AudioSink>, cues: CueBank) -> Self {
        Self {
            synth,
            sink,
            cues: Arc::new(cues),
            tokens: Mutex::new(Tokens {
                generation: CancellationToken::new(),
                speech: None,
            }),
        }
    }

    fn next_speech_token(&self) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = tokens.speech.take() {
            previous.cancel();
        }
        let token = tokens.generation.child_token();
        tokens.speech = Some(token.clone());
        token
    }

    fn cue_token(&self) -> CancellationToken {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
            .child_token()
    }
}

/// Play a clip on a blocking thread, logging device failures
async fn play(sink: Arc<dyn AudioSink>, clip: Clip, cancel: CancellationToken) -> bool {
    let result = tokio::task::spawn_blocking(move || sink.play(&clip, &cancel)).await;
    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "audio playback failed");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "playback task failed");
            false
        }
    }
}

impl Speaker for SpeechOutput {
    fn speak(&self, text: &str, lead_in: Option<AudioCue>) -> SpeechTicket {
        let token = self.next_speech_token();
        let (tx, rx) = oneshot::channel();

        let text = text.to_string();
        let synth = Arc::clone(&self.synth);
        let sink = Arc::clone(&self.sink);
        let cues = Arc::clone(&self.cues);

        tokio::spawn(async move {
            if let Some(cue) = lead_in {
                play(Arc::clone(&sink), cues.clip(cue).clone(), token.clone()).await;
            }

            let audio = tokio::select! {
                () = token.cancelled() => {
                    let _ = tx.send(SpeechOutcome::Cancelled);
                    return;
                }
                audio = synth.synthesize(&text) => audio,
            };

            let clip = match audio.and_then(|bytes| decode_mp3(&bytes)) {
                Ok(clip) => clip,
                Err(e) => {
                    tracing::warn!(error = %e, "speech synthesis failed, playing warning tone");
                    play(sink, cues.clip(AudioCue::Warning).clone(), token).await;
                    let _ = tx.send(SpeechOutcome::Failed(e.to_string()));
                    return;
                }
            };

            tracing::debug!(secs = clip.duration().as_secs_f32(), "speaking");
            let played = play(Arc::clone(&sink), clip, token.clone()).await;

            let outcome = if token.is_cancelled() {
                SpeechOutcome::Cancelled
            } else if played {
                SpeechOutcome::Finished
            } else {
                play(sink, cues.clip(AudioCue::Warning).clone(), token).await;
                SpeechOutcome::Failed("audio output failed".to_string())
            };
            let _ = tx.send(outcome);
        });

        SpeechTicket::from_receiver(rx)
    }

    fn cue(&self, cue: AudioCue) {
        let token = self.cue_token();
        let sink = Arc::clone(&self.sink);
        let clip = self.cues.clip(cue).clone();
        tokio::spawn(play(sink, clip, token));
    }

    fn cancel(&self) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.generation.cancel();
        tokens.generation = CancellationToken::new();
        tokens.speech = None;
    }
}
