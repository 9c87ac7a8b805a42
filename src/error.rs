//! Error types for Lookout

use thiserror::Error;

/// Result type alias for Lookout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Lookout
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera device or frame decoding error
    #[error("camera error: {0}")]
    Camera(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Image encoding or decoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Terminal preview error
    #[error("preview error: {0}")]
    Preview(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
