//! Short audio cues for interaction feedback

use std::path::Path;
use std::time::Duration;

use super::playback::{Clip, decode_mp3, tone};

/// Named feedback sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCue {
    /// An answer arrived
    Success,
    /// Something went wrong, or a hazard is being announced
    Warning,
    /// A request was sent
    Thinking,
}

impl AudioCue {
    pub const ALL: [Self; 3] = [Self::Success, Self::Warning, Self::Thinking];

    /// File name looked up in the sounds directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Success => "success.mp3",
            Self::Warning => "warning.mp3",
            Self::Thinking => "thinking.mp3",
        }
    }

    pub(crate) fn builtin(self) -> Clip {
        let ms = Duration::from_millis;
        match self {
            Self::Success => tone(&[(660.0, ms(90)), (990.0, ms(140))], 0.35),
            Self::Warning => tone(&[(880.0, ms(120)), (0.0, ms(60)), (880.0, ms(120))], 0.45),
            Self::Thinking => tone(&[(520.0, ms(70))], 0.2),
        }
    }
}

/// Loaded clips for every cue
#[derive(Debug, Clone)]
pub struct CueBank {
    success: Clip,
    warning: Clip,
    thinking: Clip,
}

impl CueBank {
    /// Load cue files from `sounds_dir`, using built-in tones for any that are missing
    #[must_use]
    pub fn load(sounds_dir: &Path) -> Self {
        let load = |cue: AudioCue| {
            let path = sounds_dir.join(cue.file_name());
            if !path.exists() {
                tracing::debug!(path = %path.display(), "cue file not found, using built-in tone");
                return cue.builtin();
            }

            match std::fs::read(&path).map_err(crate::Error::from).and_then(|b| decode_mp3(&b)) {
                Ok(clip) => {
                    tracing::debug!(path = %path.display(), "loaded cue");
                    clip
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unusable cue file, using built-in tone");
                    cue.builtin()
                }
            }
        };

        Self {
            success: load(AudioCue::Success),
            warning: load(AudioCue::Warning),
            thinking: load(AudioCue::Thinking),
        }
    }

    /// Built-in tones only
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            success: AudioCue::Success.builtin(),
            warning: AudioCue::Warning.builtin(),
            thinking: AudioCue::Thinking.builtin(),
        }
    }

    #[must_use]
    pub const fn clip(&self, cue: AudioCue) -> &Clip {
        match cue {
            AudioCue::Success => &self.success,
            AudioCue::Warning => &self.warning,
            AudioCue::Thinking => &self.thinking,
        }
    }
}
