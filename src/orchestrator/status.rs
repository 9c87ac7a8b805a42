//! Snapshot of orchestrator state for display

use std::fmt;

use crate::session::Mode;

/// Interaction state machine position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InteractionState {
    #[default]
    Idle,
    Capturing,
    Listening,
    Requesting,
    Speaking,
    Stopped,
}

impl InteractionState {
    /// Whether a new capture or follow-up must be rejected
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Capturing | Self::Listening | Self::Requesting)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "ready",
            Self::Capturing => "capturing",
            Self::Listening => "listening",
            Self::Requesting => "thinking",
            Self::Speaking => "speaking",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the preview shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: InteractionState,
    pub mode: Mode,
    pub camera_ok: bool,
    /// Turns in the current topic
    pub turns: usize,
    pub last_question: Option<String>,
    pub last_answer: Option<String>,
    /// Most recent warning or notice
    pub notice: Option<String>,
}

impl Status {
    #[must_use]
    pub const fn new(mode: Mode) -> Self {
        Self {
            state: InteractionState::Idle,
            mode,
            camera_ok: true,
            turns: 0,
            last_question: None,
            last_answer: None,
            notice: None,
        }
    }
}
