//! User commands driving the orchestrator

use crate::session::Mode;

/// An input event from the keyboard (or any other front end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Snapshot the camera and ask a new question
    Capture,
    /// Ask another question about the last captured frame
    FollowUp,
    SwitchMode(Mode),
    Quit,
}

impl Command {
    /// Map a key press to a command
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Self::Capture),
            'f' | 'F' => Some(Self::FollowUp),
            'q' | 'Q' => Some(Self::Quit),
            other => Mode::from_key(other).map(Self::SwitchMode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bindings() {
        assert_eq!(Command::from_char(' '), Some(Command::Capture));
        assert_eq!(Command::from_char('f'), Some(Command::FollowUp));
        assert_eq!(Command::from_char('2'), Some(Command::SwitchMode(Mode::Street)));
        assert_eq!(Command::from_char('Q'), Some(Command::Quit));
        assert_eq!(Command::from_char('x'), None);
    }
}
