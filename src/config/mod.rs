//! Configuration management for Lookout
//!
//! Values resolve as CLI flag > environment > TOML file > default. CLI flags
//! are applied by the binary on top of [`Config::load`], then
//! [`Config::validate`] runs once on the final result.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::session::Mode;
use crate::{Error, Result};

/// Default backend endpoint base URL
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

/// Lookout configuration
#[derive(Debug)]
pub struct Config {
    pub camera: CameraConfig,
    pub voice: VoiceConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub api_keys: ApiKeys,

    /// Directory with optional cue sound files
    pub sounds_dir: PathBuf,

    /// Directory for the log file (`~/.local/share/lookout` on Linux)
    pub data_dir: PathBuf,
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Camera device index
    pub index: u32,

    /// Index tried when `index` cannot be opened
    pub fallback_index: Option<u32>,

    /// Serve this image instead of a camera
    pub still_image: Option<PathBuf>,

    /// First reacquisition delay after a device error
    pub retry_base: Duration,

    /// Reacquisition delay cap
    pub retry_max: Duration,
}

/// Speech-to-text provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

/// Text-to-speech provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    ElevenLabs,
}

/// Voice input/output configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// Language hint passed to the STT provider
    pub language: Option<String>,

    /// How long to wait for speech to start
    pub listen_timeout: Duration,

    /// Longest phrase recorded
    pub max_phrase: Duration,

    /// Trailing silence that ends a phrase
    pub silence: Duration,

    /// Ambient noise sampling before listening
    pub calibration: Duration,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,
}

/// Inference backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Multipart `POST {url}/analyze`
    Analyze,
    /// Google Generative Language API
    Gemini,
}

/// Backend client configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Base URL for the analyze endpoint
    pub url: String,

    /// Model used with `BackendKind::Gemini`
    pub gemini_model: String,

    /// Per-attempt request timeout
    pub timeout: Duration,

    /// Delay before the single retry
    pub retry_base: Duration,

    /// JPEG quality (1 to 100)
    pub jpeg_quality: u8,

    /// Longest image side sent upstream, 0 for full size
    pub max_image_dim: u32,
}

/// Session behaviour
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Clear history and topic when the mode changes
    pub reset_history_on_mode_switch: bool,

    /// History cap, 0 for unbounded
    pub max_history_turns: usize,

    pub initial_mode: Mode,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// Google Gemini API key
    pub gemini: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl ApiKeys {
    /// Names of the keys that are set, for display
    #[must_use]
    pub fn present(&self) -> Vec<&'static str> {
        [
            ("openai", &self.openai),
            ("gemini", &self.gemini),
            ("deepgram", &self.deepgram),
            ("elevenlabs", &self.elevenlabs),
        ]
        .into_iter()
        .filter(|(_, key)| key.as_ref().is_some_and(|k| !k.expose_secret().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(
        fc: file::LookoutConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            gemini: env("GEMINI_API_KEY")
                .or(fc.api_keys.gemini)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        let camera = CameraConfig {
            index: parse_env(&env, "LOOKOUT_CAMERA_INDEX")?
                .or(fc.camera.index)
                .unwrap_or(0),
            fallback_index: parse_env(&env, "LOOKOUT_CAMERA_FALLBACK_INDEX")?
                .or(fc.camera.fallback_index)
                .or(Some(1)),
            still_image: env("LOOKOUT_STILL_IMAGE").map(PathBuf::from),
            retry_base: Duration::from_millis(fc.camera.retry_base_ms.unwrap_or(500)),
            retry_max: Duration::from_millis(fc.camera.retry_max_ms.unwrap_or(10_000)),
        };

        let stt_provider = match env("LOOKOUT_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .as_deref()
        {
            None | Some("whisper" | "openai") => SttProvider::Whisper,
            Some("deepgram") => SttProvider::Deepgram,
            Some(other) => {
                return Err(Error::Config(format!("unknown STT provider: {other}")));
            }
        };
        let tts_provider = match env("LOOKOUT_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .as_deref()
        {
            None | Some("openai") => TtsProvider::OpenAi,
            Some("elevenlabs") => TtsProvider::ElevenLabs,
            Some(other) => {
                return Err(Error::Config(format!("unknown TTS provider: {other}")));
            }
        };

        let default_stt_model = match stt_provider {
            SttProvider::Whisper => "whisper-1",
            SttProvider::Deepgram => "nova-2",
        };

        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("LOOKOUT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| default_stt_model.to_string()),
            language: env("LOOKOUT_LANGUAGE")
                .or(fc.voice.language)
                .filter(|l| !l.is_empty()),
            listen_timeout: Duration::from_secs(fc.voice.listen_timeout_secs.unwrap_or(5)),
            max_phrase: Duration::from_secs(fc.voice.max_phrase_secs.unwrap_or(6)),
            silence: Duration::from_millis(fc.voice.silence_ms.unwrap_or(800)),
            calibration: Duration::from_millis(fc.voice.calibration_ms.unwrap_or(1000)),
            tts_provider,
            tts_model: env("LOOKOUT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: env("LOOKOUT_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
        };

        let kind = match env("LOOKOUT_BACKEND").or(fc.backend.kind).as_deref() {
            None | Some("analyze") => BackendKind::Analyze,
            Some("gemini") => BackendKind::Gemini,
            Some(other) => {
                return Err(Error::Config(format!("unknown backend kind: {other}")));
            }
        };

        let backend = BackendConfig {
            kind,
            url: env("LOOKOUT_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            gemini_model: env("LOOKOUT_GEMINI_MODEL")
                .or(fc.backend.gemini_model)
                .unwrap_or_else(|| "gemini-1.5-flash-latest".to_string()),
            timeout: Duration::from_secs(
                parse_env(&env, "LOOKOUT_BACKEND_TIMEOUT_SECS")?
                    .or(fc.backend.timeout_secs)
                    .unwrap_or(20),
            ),
            retry_base: Duration::from_millis(fc.backend.retry_base_ms.unwrap_or(500)),
            jpeg_quality: fc.backend.jpeg_quality.unwrap_or(85),
            max_image_dim: fc.backend.max_image_dim.unwrap_or(1024),
        };

        let initial_mode = match env("LOOKOUT_MODE").or(fc.session.initial_mode) {
            Some(s) => s.parse().map_err(Error::Config)?,
            None => Mode::default(),
        };

        let session = SessionConfig {
            reset_history_on_mode_switch: fc.session.reset_history_on_mode_switch.unwrap_or(true),
            max_history_turns: fc.session.max_history_turns.unwrap_or(0),
            initial_mode,
        };

        let data_dir = env("LOOKOUT_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let sounds_dir = env("LOOKOUT_SOUNDS_DIR")
            .or(fc.sounds_dir)
            .map_or_else(|| data_dir.join("sounds"), PathBuf::from);

        Ok(Self {
            camera,
            voice,
            backend,
            session,
            api_keys,
            sounds_dir,
            data_dir,
        })
    }

    /// Check the resolved configuration for values that cannot work
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.backend.kind == BackendKind::Analyze {
            let url = self.backend.url.trim();
            if url.is_empty() {
                return Err(Error::Config("backend url is empty".to_string()));
            }
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid backend url '{url}': {e}")))?;
        }

        if self.backend.timeout.is_zero() {
            return Err(Error::Config("backend timeout must be positive".to_string()));
        }
        if self.voice.listen_timeout.is_zero() || self.voice.max_phrase.is_zero() {
            return Err(Error::Config("voice timeouts must be positive".to_string()));
        }
        if !(1..=100).contains(&self.backend.jpeg_quality) {
            return Err(Error::Config(format!(
                "jpeg quality {} is outside 1-100",
                self.backend.jpeg_quality
            )));
        }
        if !(0.25..=4.0).contains(&self.voice.tts_speed) {
            return Err(Error::Config(format!(
                "tts speed {} is outside 0.25-4.0",
                self.voice.tts_speed
            )));
        }
        if self.camera.retry_base.is_zero() || self.camera.retry_max < self.camera.retry_base {
            return Err(Error::Config(
                "camera retry delays must be positive and max >= base".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the log file written while the preview owns the terminal
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("lookout.log")
    }
}

/// `~/.local/share/lookout` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("lookout"))
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    env(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {v}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::file::LookoutConfigFile;
    use super::*;

    fn resolve(fc: LookoutConfigFile, vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = resolve(LookoutConfigFile::default(), &[]).unwrap();
        config.validate().unwrap();

        assert_eq!(config.camera.index, 0);
        assert_eq!(config.camera.fallback_index, Some(1));
        assert_eq!(config.backend.kind, BackendKind::Analyze);
        assert_eq!(config.backend.url, DEFAULT_BACKEND_URL);
        assert_eq!(config.voice.listen_timeout, Duration::from_secs(5));
        assert_eq!(config.session.initial_mode, Mode::General);
        assert!(config.session.reset_history_on_mode_switch);
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = LookoutConfigFile::default();
        fc.backend.url = Some("http://file:5000".to_string());
        fc.camera.index = Some(3);

        let config = resolve(
            fc,
            &[
                ("LOOKOUT_BACKEND_URL", "http://env:5000"),
                ("LOOKOUT_MODE", "kitchen"),
            ],
        )
        .unwrap();

        assert_eq!(config.backend.url, "http://env:5000");
        assert_eq!(config.camera.index, 3);
        assert_eq!(config.session.initial_mode, Mode::Kitchen);
    }

    #[test]
    fn invalid_env_number_is_an_error() {
        assert!(resolve(LookoutConfigFile::default(), &[("LOOKOUT_CAMERA_INDEX", "front")]).is_err());
    }

    #[test]
    fn unknown_mode_is_an_error() {
        assert!(resolve(LookoutConfigFile::default(), &[("LOOKOUT_MODE", "beach")]).is_err());
    }

    #[test]
    fn deepgram_gets_its_default_model() {
        let config = resolve(
            LookoutConfigFile::default(),
            &[("LOOKOUT_STT_PROVIDER", "deepgram")],
        )
        .unwrap();
        assert_eq!(config.voice.stt_provider, SttProvider::Deepgram);
        assert_eq!(config.voice.stt_model, "nova-2");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = resolve(LookoutConfigFile::default(), &[]).unwrap();
        config.backend.url = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = resolve(LookoutConfigFile::default(), &[]).unwrap();
        config.backend.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = resolve(LookoutConfigFile::default(), &[]).unwrap();
        config.backend.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = resolve(LookoutConfigFile::default(), &[]).unwrap();
        config.voice.tts_speed = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn gemini_backend_ignores_url() {
        let mut config =
            resolve(LookoutConfigFile::default(), &[("LOOKOUT_BACKEND", "gemini")]).unwrap();
        config.backend.url = String::new();
        config.validate().unwrap();
    }

    #[test]
    fn present_keys_skip_empty() {
        let config = resolve(
            LookoutConfigFile::default(),
            &[("OPENAI_API_KEY", "sk-test"), ("GEMINI_API_KEY", "")],
        )
        .unwrap();
        assert_eq!(config.api_keys.present(), vec!["openai"]);
    }

    #[test]
    fn sounds_dir_defaults_under_data_dir() {
        let config = resolve(
            LookoutConfigFile::default(),
            &[("LOOKOUT_DATA_DIR", "/tmp/lookout-test")],
        )
        .unwrap();
        assert_eq!(config.sounds_dir, PathBuf::from("/tmp/lookout-test/sounds"));
        assert_eq!(
            config.log_file(),
            PathBuf::from("/tmp/lookout-test/lookout.log")
        );
    }
}
