//! Shared test utilities: scripted stages and an orchestrator harness

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lookout::backend::{AttemptError, BackendClient, Transport};
use lookout::capture::{CaptureEvent, Frame, FrameWriter, RawFrame, frame_slot};
use lookout::orchestrator::{Event, Settings, Stages};
use lookout::retry::RetryPolicy;
use lookout::session::Request;
use lookout::voice::{AudioCue, QuestionSource, Speaker, SpeechOutcome, SpeechTicket, VoiceError};
use lookout::{Command, Mode, Orchestrator, OrchestratorHandle, SessionState};

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(5);

/// A small solid-color frame
#[must_use]
pub fn raw_frame(shade: u8) -> RawFrame {
    RawFrame {
        width: 4,
        height: 4,
        rgb: vec![shade; 4 * 4 * 3],
    }
}

#[must_use]
pub fn frame(seq: u64) -> Arc<Frame> {
    Arc::new(Frame::new(seq, raw_frame(128)).expect("valid frame"))
}

// -- voice --

/// One scripted `record_question` outcome
#[derive(Debug, Clone)]
pub enum Heard {
    Question(&'static str),
    /// The question arrives after a delay
    Slow(Duration, &'static str),
    Fail(VoiceError),
    /// Never returns until cancelled
    Hang,
}

#[derive(Default)]
pub struct ScriptedVoice {
    script: Mutex<VecDeque<Heard>>,
    pub calls: AtomicUsize,
}

impl ScriptedVoice {
    #[must_use]
    pub fn new(script: Vec<Heard>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QuestionSource for ScriptedVoice {
    async fn record_question(
        &self,
        _timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Heard::Fail(VoiceError::NoSpeechDetected));

        match next {
            Heard::Question(q) => Ok(q.to_string()),
            Heard::Slow(delay, q) => tokio::select! {
                () = tokio::time::sleep(delay) => Ok(q.to_string()),
                () = cancel.cancelled() => Err(VoiceError::Cancelled),
            },
            Heard::Fail(e) => Err(e),
            Heard::Hang => {
                cancel.cancelled().await;
                Err(VoiceError::Cancelled)
            }
        }
    }
}

// -- backend --

/// One scripted transport attempt
#[derive(Debug, Clone)]
pub enum Reply {
    Answer(&'static str),
    Slow(Duration, &'static str),
    Fail(AttemptError),
    /// Never answers
    Hang,
}

#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
    #[must_use]
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every attempt made so far, retries included
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &Request) -> Result<String, AttemptError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Answer("ok"));

        match next {
            Reply::Answer(a) => Ok(a.to_string()),
            Reply::Slow(delay, a) => {
                tokio::time::sleep(delay).await;
                Ok(a.to_string())
            }
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// -- speaker --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spoken {
    pub text: String,
    pub lead_in: Option<AudioCue>,
}

/// Records everything it is asked to say
///
/// With `hold` set, speech never finishes on its own and resolves as
/// cancelled when interrupted.
#[derive(Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<Spoken>>,
    cues: Mutex<Vec<AudioCue>>,
    held: Mutex<Vec<oneshot::Sender<SpeechOutcome>>>,
    pub hold: AtomicBool,
    pub cancels: AtomicUsize,
}

impl RecordingSpeaker {
    #[must_use]
    pub fn spoken(&self) -> Vec<Spoken> {
        self.spoken.lock().unwrap().clone()
    }

    #[must_use]
    pub fn cues(&self) -> Vec<AudioCue> {
        self.cues.lock().unwrap().clone()
    }

    #[must_use]
    pub fn said(&self, text: &str) -> bool {
        self.spoken().iter().any(|s| s.text == text)
    }
}

impl Speaker for RecordingSpeaker {
    fn speak(&self, text: &str, lead_in: Option<AudioCue>) -> SpeechTicket {
        self.spoken.lock().unwrap().push(Spoken {
            text: text.to_string(),
            lead_in,
        });

        let mut held = self.held.lock().unwrap();
        // a new utterance replaces the previous one
        held.clear();
        if self.hold.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            held.push(tx);
            SpeechTicket::from_receiver(rx)
        } else {
            SpeechTicket::ready(SpeechOutcome::Finished)
        }
    }

    fn cue(&self, cue: AudioCue) {
        self.cues.lock().unwrap().push(cue);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.held.lock().unwrap().clear();
    }
}

// -- harness --

/// Options for a harnessed orchestrator
pub struct Setup {
    pub voice: Vec<Heard>,
    pub backend: Vec<Reply>,
    pub mode: Mode,
    pub with_frame: bool,
    pub hold_speech: bool,
    pub reset_on_mode_switch: bool,
    pub backend_timeout: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            voice: Vec::new(),
            backend: Vec::new(),
            mode: Mode::General,
            with_frame: true,
            hold_speech: false,
            reset_on_mode_switch: true,
            backend_timeout: Duration::from_millis(200),
        }
    }
}

/// A running orchestrator wired to fake stages
pub struct Harness {
    pub handle: OrchestratorHandle,
    pub voice: Arc<ScriptedVoice>,
    pub transport: Arc<FakeTransport>,
    pub speaker: Arc<RecordingSpeaker>,
    pub frames: FrameWriter,
    pub camera: mpsc::UnboundedSender<CaptureEvent>,
    events: mpsc::UnboundedReceiver<Event>,
    task: JoinHandle<SessionState>,
}

impl Setup {
    pub fn start(self) -> Harness {
        let voice = ScriptedVoice::new(self.voice);
        let transport = FakeTransport::new(self.backend);
        let speaker = Arc::new(RecordingSpeaker::default());
        speaker.hold.store(self.hold_speech, Ordering::SeqCst);

        let backend = BackendClient::new(
            transport.clone(),
            self.backend_timeout,
            RetryPolicy::once(Duration::from_millis(1)),
        );
        let stages = Stages {
            voice: voice.clone(),
            backend: Arc::new(backend),
            speaker: speaker.clone(),
        };

        let (mut frames, slot) = frame_slot();
        if self.with_frame {
            frames.publish(raw_frame(100)).expect("publish frame");
        }

        let session = SessionState::new(self.mode, self.reset_on_mode_switch, 0);
        let settings = Settings {
            quit_grace: Duration::from_millis(500),
            ..Settings::default()
        };

        let (camera_tx, camera_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (orchestrator, handle) = Orchestrator::new(session, stages, slot, settings);
        let orchestrator = orchestrator
            .with_capture_events(camera_rx)
            .with_events(events_tx);

        Harness {
            handle,
            voice,
            transport,
            speaker,
            frames,
            camera: camera_tx,
            events: events_rx,
            task: tokio::spawn(orchestrator.run()),
        }
    }
}

impl Harness {
    pub fn send(&self, command: Command) {
        assert!(self.handle.send(command), "orchestrator stopped early");
    }

    /// Wait for the first event matching `pred`, returning it
    pub async fn wait_for(&mut self, pred: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => {}
                    None => panic!("orchestrator stopped before the event arrived"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Send a command and wait until the interaction is back in `Idle`
    pub async fn interact(&mut self, command: Command) {
        self.send(command);
        self.wait_for(|e| *e == Event::State(lookout::orchestrator::InteractionState::Idle))
            .await;
    }

    /// Quit and return the final session
    pub async fn quit(self) -> SessionState {
        let _ = self.handle.send(Command::Quit);
        Self::join(self.task).await
    }

    /// Drop the command handle without quitting and return the final session
    pub async fn hang_up(self) -> SessionState {
        drop(self.handle);
        Self::join(self.task).await
    }

    async fn join(task: JoinHandle<SessionState>) -> SessionState {
        tokio::time::timeout(WAIT, task)
            .await
            .expect("orchestrator did not stop")
            .expect("orchestrator panicked")
    }
}
