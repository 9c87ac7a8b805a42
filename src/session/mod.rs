//! Session state: active mode, current topic frame, and conversation history
//!
//! The orchestrator owns a single [`SessionState`]. An interaction moves
//! through it in three steps:
//!
//! 1. [`SessionState::begin_capture`] or [`SessionState::begin_follow_up`]
//!    reserves a sequence number and fixes the frame the question is about.
//! 2. [`SessionState::dispatch`] builds the [`Request`] and marks it in flight.
//! 3. [`SessionState::complete`] records the answer as a [`Turn`], but only if
//!    the request is still the one in flight.
//!
//! Nothing about the topic changes until step 3, so an interaction that is
//! cancelled or fails leaves the session exactly as it was.

mod history;
mod request;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use history::{ConversationHistory, HistoryEntry, HistoryError, Turn};
pub use request::Request;

use crate::capture::{EncodedImage, Frame};
use crate::prompt;

/// Assistance mode, selecting the system prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    General,
    Street,
    Kitchen,
}

impl Mode {
    pub const ALL: [Self; 3] = [Self::General, Self::Street, Self::Kitchen];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Street => "street",
            Self::Kitchen => "kitchen",
        }
    }

    /// Keyboard shortcut selecting this mode
    #[must_use]
    pub const fn key(self) -> char {
        match self {
            Self::General => '1',
            Self::Street => '2',
            Self::Kitchen => '3',
        }
    }

    #[must_use]
    pub const fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(Self::General),
            '2' => Some(Self::Street),
            '3' => Some(Self::Kitchen),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "street" => Ok(Self::Street),
            "kitchen" => Ok(Self::Kitchen),
            other => Err(format!(
                "unknown mode '{other}' (expected general, street or kitchen)"
            )),
        }
    }
}

/// A follow-up was requested before any capture established a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no image has been captured yet")]
pub struct NoActiveFrame;

/// Why an answer was not recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompleteError {
    /// The request was cancelled or superseded
    #[error("answer for turn {0} is no longer expected")]
    Stale(u64),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Result of a mode switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSwitch {
    Unchanged,
    Switched {
        from: Mode,
        to: Mode,
        history_cleared: bool,
    },
}

/// An interaction that has reserved a sequence number but not yet completed
#[derive(Debug, Clone)]
pub struct Pending {
    seq: u64,
    frame: Arc<Frame>,
    /// Topic generation when the interaction began
    topic: u64,
    follow_up: bool,
}

impl Pending {
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    #[must_use]
    pub const fn is_follow_up(&self) -> bool {
        self.follow_up
    }
}

/// Mode, topic frame, and history for the running session
#[derive(Debug)]
pub struct SessionState {
    mode: Mode,
    frame: Option<Arc<Frame>>,
    history: ConversationHistory,
    in_flight: Option<u64>,
    next_seq: u64,
    /// Bumped whenever the topic is replaced or reset
    topic: u64,
    reset_on_mode_switch: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(mode: Mode, reset_on_mode_switch: bool, max_history_turns: usize) -> Self {
        Self {
            mode,
            frame: None,
            history: ConversationHistory::new(max_history_turns),
            in_flight: None,
            next_seq: 1,
            topic: 0,
            reset_on_mode_switch,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Frame of the current topic, if any capture has been answered
    #[must_use]
    pub const fn frame(&self) -> Option<&Arc<Frame>> {
        self.frame.as_ref()
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Change the active mode
    ///
    /// With history reset enabled, a real switch also ends the current topic,
    /// so a later follow-up needs a fresh capture.
    pub fn switch_mode(&mut self, mode: Mode) -> ModeSwitch {
        if mode == self.mode {
            return ModeSwitch::Unchanged;
        }

        let from = self.mode;
        self.mode = mode;

        let history_cleared = self.reset_on_mode_switch;
        if history_cleared {
            self.history.clear();
            self.frame = None;
            self.topic += 1;
        }

        tracing::debug!(%from, to = %mode, history_cleared, "mode switched");

        ModeSwitch::Switched {
            from,
            to: mode,
            history_cleared,
        }
    }

    /// Start a new topic around a freshly captured frame
    ///
    /// The previous topic is closed at once: its frame is dropped, so a
    /// follow-up needs this capture to be answered first. Its turns stay in
    /// the history until the new answer replaces them.
    pub fn begin_capture(&mut self, frame: Arc<Frame>) -> Pending {
        self.frame = None;
        self.topic += 1;
        Pending {
            seq: self.reserve_seq(),
            frame,
            topic: self.topic,
            follow_up: false,
        }
    }

    /// Continue the current topic with its stored frame
    ///
    /// # Errors
    ///
    /// Returns `NoActiveFrame` if no capture has been answered in this topic
    pub fn begin_follow_up(&mut self) -> Result<Pending, NoActiveFrame> {
        let frame = self.frame.clone().ok_or(NoActiveFrame)?;
        Ok(Pending {
            seq: self.reserve_seq(),
            frame,
            topic: self.topic,
            follow_up: true,
        })
    }

    /// Build the request for a pending interaction and mark it in flight
    ///
    /// The mode is read now, so a switch made while listening applies. A
    /// follow-up whose topic was reset in the meantime is sent as a new topic
    /// about its own frame.
    pub fn dispatch(
        &mut self,
        pending: &Pending,
        question: &str,
        image: Option<EncodedImage>,
    ) -> Request {
        let history = if self.opens_topic(pending) {
            Vec::new()
        } else {
            self.history.entries()
        };

        self.in_flight = Some(pending.seq);

        Request {
            seq: pending.seq,
            mode: self.mode,
            prompt: prompt::compose(self.mode, question),
            question: question.to_string(),
            image,
            history,
        }
    }

    /// Record the answer for the request in flight
    ///
    /// # Errors
    ///
    /// Returns `CompleteError::Stale` if `pending` is not the request in flight.
    /// Returns `CompleteError::History` if the turn would break ordering.
    pub fn complete(
        &mut self,
        pending: &Pending,
        question: &str,
        answer: &str,
    ) -> Result<&Turn, CompleteError> {
        if self.in_flight != Some(pending.seq) {
            return Err(CompleteError::Stale(pending.seq));
        }
        self.in_flight = None;

        let turn = Turn {
            seq: pending.seq,
            question: question.to_string(),
            answer: answer.to_string(),
            frame: Some(Arc::clone(&pending.frame)),
            mode: self.mode,
            answered_at: Utc::now(),
        };

        if self.opens_topic(pending) {
            self.history.clear();
            self.frame = Some(Arc::clone(&pending.frame));
            self.topic += 1;
        }
        self.history.push(turn)?;

        self.history.last().ok_or(CompleteError::Stale(pending.seq))
    }

    /// Forget the request in flight without recording anything
    pub fn abandon(&mut self, seq: u64) {
        if self.in_flight == Some(seq) {
            self.in_flight = None;
        }
    }

    fn opens_topic(&self, pending: &Pending) -> bool {
        !pending.follow_up || pending.topic != self.topic
    }

    const fn reserve_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
