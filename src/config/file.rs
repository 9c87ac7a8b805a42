//! TOML configuration file loading
//!
//! Supports `~/.config/lookout/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LookoutConfigFile {
    #[serde(default)]
    pub camera: CameraFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub backend: BackendFileConfig,

    #[serde(default)]
    pub session: SessionFileConfig,

    /// API keys; environment variables take priority
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Directory holding `success.mp3`, `warning.mp3`, `thinking.mp3`
    pub sounds_dir: Option<String>,

    /// Directory for the log file
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CameraFileConfig {
    pub index: Option<u32>,
    pub fallback_index: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// Language hint, e.g. "en"
    pub language: Option<String>,
    pub listen_timeout_secs: Option<u64>,
    pub max_phrase_secs: Option<u64>,
    pub silence_ms: Option<u64>,
    pub calibration_ms: Option<u64>,
    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// "analyze" or "gemini"
    pub kind: Option<String>,
    pub url: Option<String>,
    pub gemini_model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retry_base_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
    pub max_image_dim: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub reset_history_on_mode_switch: Option<bool>,
    pub max_history_turns: Option<usize>,
    pub initial_mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LookoutConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LookoutConfigFile {
    config_file_path().map_or_else(LookoutConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> LookoutConfigFile {
    if !path.exists() {
        return LookoutConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LookoutConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LookoutConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/lookout/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("lookout").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_from(&dir.path().join("absent.toml"));
        assert!(fc.backend.url.is_none());
        assert!(fc.camera.index.is_none());
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
sounds_dir = "/opt/sounds"

[camera]
index = 2

[backend]
url = "http://10.0.0.5:5000"
jpeg_quality = 60

[session]
reset_history_on_mode_switch = false
"#,
        )
        .unwrap();

        let fc = load_from(&path);
        assert_eq!(fc.camera.index, Some(2));
        assert_eq!(fc.camera.fallback_index, None);
        assert_eq!(fc.backend.url.as_deref(), Some("http://10.0.0.5:5000"));
        assert_eq!(fc.backend.jpeg_quality, Some(60));
        assert_eq!(fc.session.reset_history_on_mode_switch, Some(false));
        assert_eq!(fc.sounds_dir.as_deref(), Some("/opt/sounds"));
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[camera\nindex = ").unwrap();

        let fc = load_from(&path);
        assert!(fc.camera.index.is_none());
    }
}
