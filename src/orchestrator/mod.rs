//! Interaction orchestrator
//!
//! Owns the [`SessionState`] and drives one interaction at a time through
//! `Capturing → Listening → Requesting → Speaking`. Every stage runs as a
//! future inside a `select!` loop, so commands and camera events keep being
//! handled while a stage is suspended.

mod command;
mod fault;
mod status;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub use command::Command;
pub use fault::{Fault, FaultCategory};
pub use status::{InteractionState, Status};

use crate::backend::{BackendClient, BackendError};
use crate::capture::{CaptureEvent, EncodedImage, Frame, FrameSlot};
use crate::config::Config;
use crate::prompt;
use crate::session::{Mode, ModeSwitch, Pending, SessionState};
use crate::voice::{AudioCue, QuestionSource, Speaker, SpeechOutcome, VoiceError};

/// Time allowed for transcription on top of the recording limits
const TRANSCRIBE_ALLOWANCE: Duration = Duration::from_secs(15);

/// Tuning knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct Settings {
    /// Upper bound for one `record_question` call
    pub question_timeout: Duration,
    pub jpeg_quality: u8,
    pub max_image_dim: u32,
    /// How long a cancelled stage gets to release its devices on quit
    pub quit_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            question_timeout: Duration::from_secs(30),
            jpeg_quality: 85,
            max_image_dim: 1024,
            quit_grace: Duration::from_secs(2),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let voice = &config.voice;
        Self {
            question_timeout: voice.calibration
                + voice.listen_timeout
                + voice.max_phrase
                + TRANSCRIBE_ALLOWANCE,
            jpeg_quality: config.backend.jpeg_quality,
            max_image_dim: config.backend.max_image_dim,
            ..Self::default()
        }
    }
}

/// The stages an interaction passes through
pub struct Stages {
    pub voice: Arc<dyn QuestionSource>,
    pub backend: Arc<BackendClient>,
    pub speaker: Arc<dyn Speaker>,
}

/// Notable transitions, for front ends and tests that need to follow along
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    State(InteractionState),
    Fault(Fault),
    Answered { seq: u64, answer: String },
    ModeSwitched(ModeSwitch),
}

/// Sending side of a running orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub status: watch::Receiver<Status>,
}

impl OrchestratorHandle {
    /// Queue a command; returns false once the orchestrator has stopped
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// How an interaction ended
enum Flow {
    Continue,
    /// Speech was interrupted by a new capture or follow-up
    Then(Command),
    Quit,
}

/// How a driven stage ended
enum Driven<T> {
    Done(T),
    Interrupted(Command),
    Quit,
}

enum Wake<T> {
    Done(T),
    Command(Option<Command>),
    Capture(CaptureEvent),
}

pub struct Orchestrator {
    session: SessionState,
    stages: Stages,
    settings: Settings,
    frames: FrameSlot,
    commands: mpsc::UnboundedReceiver<Command>,
    capture_events: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    status: watch::Sender<Status>,
    events: Option<mpsc::UnboundedSender<Event>>,
    shutdown: CancellationToken,
    state: InteractionState,
    /// Last reported camera failure, cleared on restore
    camera_fault: Option<String>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        session: SessionState,
        stages: Stages,
        frames: FrameSlot,
        settings: Settings,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::new(session.mode()));

        let orchestrator = Self {
            session,
            stages,
            settings,
            frames,
            commands: command_rx,
            capture_events: None,
            status: status_tx,
            events: None,
            shutdown: CancellationToken::new(),
            state: InteractionState::Idle,
            camera_fault: None,
        };
        let handle = OrchestratorHandle {
            commands: command_tx,
            status: status_rx,
        };

        (orchestrator, handle)
    }

    /// Follow camera health reported by the capture source
    #[must_use]
    pub fn with_capture_events(mut self, events: mpsc::UnboundedReceiver<CaptureEvent>) -> Self {
        self.capture_events = Some(events);
        self
    }

    /// Report transitions on `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Process commands until `Quit` or until every handle is dropped
    ///
    /// Returns the final session state.
    pub async fn run(mut self) -> SessionState {
        tracing::info!(mode = %self.session.mode(), "orchestrator started");

        let mut next = None;
        loop {
            let command = match next.take() {
                Some(command) => command,
                None => match self.wait_idle().await {
                    Some(command) => command,
                    None => Command::Quit,
                },
            };

            match command {
                Command::Capture | Command::FollowUp => match self.interaction(command).await {
                    Flow::Continue => {}
                    Flow::Then(command) => next = Some(command),
                    Flow::Quit => break,
                },
                Command::SwitchMode(mode) => self.switch_mode(mode),
                Command::Quit => break,
            }
        }

        self.shutdown.cancel();
        self.stages.speaker.cancel();
        self.set_state(InteractionState::Stopped);
        tracing::info!(turns = self.session.history().len(), "orchestrator stopped");

        self.session
    }

    /// Wait in `Idle` for the next command, handling camera events meanwhile
    async fn wait_idle(&mut self) -> Option<Command> {
        loop {
            tokio::select! {
                command = self.commands.recv() => return command,
                event = next_capture_event(&mut self.capture_events) => {
                    self.on_capture_event(event);
                }
            }
        }
    }

    async fn interaction(&mut self, kind: Command) -> Flow {
        let cancel = self.shutdown.child_token();
        let flow = self.run_stages(kind, &cancel).await;
        cancel.cancel();
        if !matches!(flow, Flow::Quit) {
            self.set_state(InteractionState::Idle);
        }
        flow
    }

    async fn run_stages(&mut self, kind: Command, cancel: &CancellationToken) -> Flow {
        let pending = if kind == Command::FollowUp {
            match self.session.begin_follow_up() {
                Ok(pending) => pending,
                Err(_) => return self.fail(Fault::NoActiveFrame),
            }
        } else {
            self.set_state(InteractionState::Capturing);
            if let Some(reason) = self.camera_fault.clone() {
                return self.fail(Fault::CameraUnavailable(reason));
            }
            match self.frames.current() {
                Some(frame) => self.session.begin_capture(frame),
                None => return self.fail(Fault::NoFrameYet),
            }
        };

        tracing::info!(
            seq = pending.seq(),
            frame = pending.frame().seq(),
            follow_up = pending.is_follow_up(),
            "interaction started"
        );

        // -- listening --
        // an announcement still playing would be recorded into the question
        self.stages.speaker.cancel();
        self.set_state(InteractionState::Listening);
        let voice = Arc::clone(&self.stages.voice);
        let listen = voice.record_question(self.settings.question_timeout, cancel.clone());
        let question = match self.drive(listen, cancel).await {
            Driven::Done(Ok(question)) => question,
            Driven::Done(Err(VoiceError::Cancelled)) | Driven::Quit => return Flow::Quit,
            Driven::Done(Err(e)) => return self.fail(Fault::Voice(e)),
            Driven::Interrupted(command) => return Flow::Then(command),
        };
        tracing::info!(seq = pending.seq(), question = %question, "question heard");
        self.status.send_modify(|s| s.last_question = Some(question.clone()));

        // -- requesting --
        self.set_state(InteractionState::Requesting);
        self.stages.speaker.cue(AudioCue::Thinking);

        let encode = encode_frame(
            Arc::clone(pending.frame()),
            self.settings.jpeg_quality,
            self.settings.max_image_dim,
        );
        let image = match self.drive(encode, cancel).await {
            Driven::Done(Ok(image)) => image,
            Driven::Done(Err(reason)) => return self.fail(Fault::Encode(reason)),
            Driven::Quit => return Flow::Quit,
            Driven::Interrupted(command) => return Flow::Then(command),
        };

        let request = self.session.dispatch(&pending, &question, Some(image));
        let backend = Arc::clone(&self.stages.backend);
        let answer = match self.drive(backend.ask(&request, cancel), cancel).await {
            Driven::Done(Ok(answer)) => answer,
            Driven::Done(Err(BackendError::Cancelled)) | Driven::Quit => {
                self.session.abandon(pending.seq());
                return Flow::Quit;
            }
            Driven::Done(Err(e)) => {
                self.session.abandon(pending.seq());
                return self.fail(Fault::Backend(e));
            }
            Driven::Interrupted(command) => {
                self.session.abandon(pending.seq());
                return Flow::Then(command);
            }
        };

        if let Err(e) = self.record_answer(&pending, &question, &answer) {
            tracing::warn!(seq = pending.seq(), error = %e, "answer not recorded");
        }

        // -- speaking --
        let lead_in = if prompt::is_hazard(&answer) {
            AudioCue::Warning
        } else {
            AudioCue::Success
        };
        let ticket = self.stages.speaker.speak(&answer, Some(lead_in));
        self.set_state(InteractionState::Speaking);

        match self.drive(ticket, cancel).await {
            Driven::Done(SpeechOutcome::Failed(reason)) => {
                self.fail(Fault::Playback(reason));
                Flow::Continue
            }
            Driven::Done(SpeechOutcome::Finished | SpeechOutcome::Cancelled) => Flow::Continue,
            Driven::Interrupted(command) => Flow::Then(command),
            Driven::Quit => Flow::Quit,
        }
    }

    fn record_answer(
        &mut self,
        pending: &Pending,
        question: &str,
        answer: &str,
    ) -> Result<(), crate::session::CompleteError> {
        let seq = self.session.complete(pending, question, answer)?.seq;
        let turns = self.session.history().len();

        tracing::info!(seq, turns, "answer received");
        self.status.send_modify(|s| {
            s.turns = turns;
            s.last_answer = Some(answer.to_string());
            s.notice = None;
        });
        self.emit(Event::Answered {
            seq,
            answer: answer.to_string(),
        });
        Ok(())
    }

    /// Poll a stage future while still serving commands and camera events
    ///
    /// On quit the stage is cancelled and given `quit_grace` to wind down.
    async fn drive<F: Future>(&mut self, fut: F, cancel: &CancellationToken) -> Driven<F::Output> {
        tokio::pin!(fut);

        loop {
            let wake = tokio::select! {
                out = &mut fut => Wake::Done(out),
                command = self.commands.recv() => Wake::Command(command),
                event = next_capture_event(&mut self.capture_events) => Wake::Capture(event),
            };

            match wake {
                Wake::Done(out) => return Driven::Done(out),
                Wake::Command(None | Some(Command::Quit)) => {
                    tracing::info!(state = %self.state, "quit requested, cancelling stage");
                    cancel.cancel();
                    self.stages.speaker.cancel();
                    if tokio::time::timeout(self.settings.quit_grace, &mut fut)
                        .await
                        .is_err()
                    {
                        tracing::warn!("stage did not stop within the grace period");
                    }
                    return Driven::Quit;
                }
                Wake::Command(Some(command @ (Command::Capture | Command::FollowUp))) => {
                    if self.state == InteractionState::Speaking {
                        tracing::debug!(?command, "interrupting speech");
                        self.stages.speaker.cancel();
                        return Driven::Interrupted(command);
                    }
                    self.reject_busy(command);
                }
                Wake::Command(Some(command @ Command::SwitchMode(mode))) => {
                    if self.state == InteractionState::Requesting {
                        self.reject_busy(command);
                    } else {
                        self.switch_mode(mode);
                    }
                }
                Wake::Capture(event) => self.on_capture_event(event),
            }
        }
    }

    fn switch_mode(&mut self, mode: Mode) {
        let switch = self.session.switch_mode(mode);
        let ModeSwitch::Switched {
            to,
            history_cleared,
            ..
        } = switch
        else {
            return;
        };

        tracing::info!(mode = %to, history_cleared, "mode changed");
        let turns = self.session.history().len();
        let notice = format!("{to} mode");
        self.status.send_modify(|s| {
            s.mode = to;
            s.turns = turns;
            s.notice = Some(notice);
        });

        match self.state {
            // the microphone is open
            InteractionState::Listening => {}
            // speaking would cut the answer off
            InteractionState::Speaking => self.stages.speaker.cue(AudioCue::Success),
            _ => {
                let _ = self.stages.speaker.speak(&format!("{to} mode."), None);
            }
        }
        self.emit(Event::ModeSwitched(switch));
    }

    fn reject_busy(&mut self, command: Command) {
        tracing::debug!(?command, state = %self.state, "busy, command rejected");
        self.stages.speaker.cue(AudioCue::Warning);
        self.status
            .send_modify(|s| s.notice = Some(Fault::Busy.announcement().to_string()));
        self.emit(Event::Fault(Fault::Busy));
    }

    /// Announce a fault; the interaction ends in `Idle`
    fn fail(&mut self, fault: Fault) -> Flow {
        match fault.category() {
            FaultCategory::Notice => tracing::info!(fault = %fault, "interaction refused"),
            _ => tracing::warn!(fault = %fault, category = ?fault.category(), "interaction failed"),
        }

        let announcement = fault.announcement();
        self.status
            .send_modify(|s| s.notice = Some(announcement.to_string()));

        // A failed playback has already sounded its warning tone
        if !matches!(fault, Fault::Playback(_)) {
            let _ = self.stages.speaker.speak(announcement, Some(AudioCue::Warning));
        }

        self.emit(Event::Fault(fault));
        Flow::Continue
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Unavailable(reason) => {
                tracing::warn!(reason = %reason, "camera unavailable");
                self.stages.speaker.cue(AudioCue::Warning);
                let notice = format!("camera unavailable: {reason}");
                self.status.send_modify(|s| {
                    s.camera_ok = false;
                    s.notice = Some(notice);
                });
                self.camera_fault = Some(reason);
            }
            CaptureEvent::Restored => {
                tracing::info!("camera restored");
                self.camera_fault = None;
                self.status.send_modify(|s| {
                    s.camera_ok = true;
                    s.notice = Some("camera restored".to_string());
                });
            }
        }
    }

    fn set_state(&mut self, state: InteractionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "state");
        self.state = state;
        self.status.send_modify(|s| s.state = state);
        self.emit(Event::State(state));
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// JPEG-encode a frame off the async runtime
async fn encode_frame(
    frame: Arc<Frame>,
    quality: u8,
    max_dim: u32,
) -> Result<EncodedImage, String> {
    tokio::task::spawn_blocking(move || frame.encode_jpeg(quality, max_dim))
        .await
        .map_err(|e| format!("encoder task failed: {e}"))?
        .map_err(|e| e.to_string())
}

/// Next camera event, or never once the source is gone
async fn next_capture_event(
    events: &mut Option<mpsc::UnboundedReceiver<CaptureEvent>>,
) -> CaptureEvent {
    if let Some(rx) = events {
        if let Some(event) = rx.recv().await {
            return event;
        }
        *events = None;
    }
    std::future::pending().await
}
