//! Interaction faults and how they are announced

use thiserror::Error;

use crate::backend::BackendError;
use crate::voice::VoiceError;

/// Broad fault category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    /// Camera or microphone
    Device,
    /// No speech or transcription failure
    Speech,
    Backend,
    /// Non-fatal output failure
    Playback,
    /// Orchestration notice such as busy
    Notice,
}

/// Everything that can end an interaction early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(transparent)]
    Voice(VoiceError),

    #[error(transparent)]
    Backend(BackendError),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("no camera frame yet")]
    NoFrameYet,

    #[error("no captured image to follow up on")]
    NoActiveFrame,

    #[error("busy")]
    Busy,

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("image encoding failed: {0}")]
    Encode(String),
}

impl Fault {
    #[must_use]
    pub const fn category(&self) -> FaultCategory {
        match self {
            Self::Voice(VoiceError::DeviceUnavailable(_)) | Self::CameraUnavailable(_) => {
                FaultCategory::Device
            }
            Self::Voice(_) => FaultCategory::Speech,
            Self::Backend(_) => FaultCategory::Backend,
            Self::Playback(_) => FaultCategory::Playback,
            Self::NoFrameYet | Self::NoActiveFrame | Self::Busy | Self::Encode(_) => {
                FaultCategory::Notice
            }
        }
    }

    /// Short sentence spoken to the user
    #[must_use]
    pub fn announcement(&self) -> &'static str {
        match self {
            Self::Voice(VoiceError::NoSpeechDetected | VoiceError::TimedOut) => {
                "I didn't hear a question. Please try again."
            }
            Self::Voice(VoiceError::TranscriptionFailed(_)) => {
                "Sorry, I couldn't understand that. Please try again."
            }
            Self::Voice(VoiceError::DeviceUnavailable(_)) => "The microphone is not available.",
            Self::Voice(VoiceError::Cancelled) => "Cancelled.",
            Self::Backend(BackendError::Unavailable(_)) => {
                "I could not reach the assistant. Please check the connection."
            }
            Self::Backend(BackendError::Rejected(_)) => {
                "The assistant could not answer that request."
            }
            Self::Backend(BackendError::Cancelled) => "Cancelled.",
            Self::CameraUnavailable(_) => "The camera is not available.",
            Self::NoFrameYet => "The camera is still starting. Please try again.",
            Self::NoActiveFrame => "There is no picture yet. Press space to take one first.",
            Self::Busy => "Please wait, I'm still working on the last question.",
            Self::Playback(_) => "Audio playback failed.",
            Self::Encode(_) => "I could not process the picture.",
        }
    }
}
