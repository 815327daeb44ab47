//! Configuration management for the talkback client
//!
//! Resolution order per field: CLI/env override > TOML file > built-in default.

pub mod file;

use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::audio::endpoint::EndpointConfig;
use crate::{Error, Result};

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

const DEFAULT_STT_PATH: &str = "/stt";
const DEFAULT_CHAT_PATH: &str = "/chat";
const DEFAULT_TTS_PATH: &str = "/tts";
const DEFAULT_HISTORY_PATH: &str = "/history";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TARGET_SAMPLE_RATE: u32 = 16_000;
const DEFAULT_LISTEN_TIMEOUT_MS: u64 = 6_000;
const DEFAULT_MIN_VOICE_RMS: f32 = 0.02;
const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Talkback client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend endpoints and timeouts
    pub backend: BackendConfig,

    /// Microphone capture configuration
    pub capture: CaptureConfig,

    /// End-of-utterance detection configuration
    pub endpoint: EndpointConfig,

    /// Interaction loop configuration
    pub interaction: InteractionConfig,
}

/// Backend transport configuration with endpoint URLs resolved up front
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the speech chat backend
    pub base_url: Url,

    /// Resolved transcription endpoint
    pub stt_url: Url,

    /// Resolved chat endpoint
    pub chat_url: Url,

    /// Resolved speech synthesis endpoint
    pub tts_url: Url,

    /// Resolved conversation history endpoint
    pub history_url: Url,

    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate uploaded audio is resampled to
    pub target_sample_rate: u32,

    /// Input device name (substring match, default device when unset)
    pub input_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            input_device: None,
        }
    }
}

/// Interaction loop configuration
#[derive(Debug, Clone, Copy)]
pub struct InteractionConfig {
    /// Hard cap on a single listening phase
    pub listen_timeout: Duration,

    /// Peak RMS a capture must reach before it is sent for transcription
    pub min_voice_rms: f32,

    /// Number of history messages rendered after a reply
    pub history_window: usize,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_millis(DEFAULT_LISTEN_TIMEOUT_MS),
            min_voice_rms: DEFAULT_MIN_VOICE_RMS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl BackendConfig {
    /// Resolve a backend configuration from a base URL and endpoint paths
    ///
    /// Paths starting with `/` replace the base URL path; relative paths
    /// resolve under it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the base URL or any endpoint path is invalid
    pub fn resolve(
        base: &str,
        stt_path: &str,
        chat_path: &str,
        tts_path: &str,
        history_path: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base)
            .map_err(|e| Error::Config(format!("invalid base URL '{base}': {e}")))?;
        Ok(Self {
            stt_url: join_endpoint(&base_url, stt_path)?,
            chat_url: join_endpoint(&base_url, chat_path)?,
            tts_url: join_endpoint(&base_url, tts_path)?,
            history_url: join_endpoint(&base_url, history_path)?,
            base_url,
            request_timeout,
        })
    }

    /// Backend configuration with default paths and timeout for a base URL
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the base URL is invalid
    pub fn with_base_url(base: &str) -> Result<Self> {
        Self::resolve(
            base,
            DEFAULT_STT_PATH,
            DEFAULT_CHAT_PATH,
            DEFAULT_TTS_PATH,
            DEFAULT_HISTORY_PATH,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

fn join_endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid endpoint path '{path}': {e}")))
}

fn require_nonzero(value: u64, name: &str) -> Result<u64> {
    if value == 0 {
        return Err(Error::Config(format!("{name} must be non-zero")));
    }
    Ok(value)
}

impl Config {
    /// Load configuration from the TOML file, environment, and overrides
    ///
    /// `config_path` points at an explicit TOML file (`--config`); `base_url`
    /// is the CLI override and wins over `TALKBACK_BASE_URL` and the file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid base URL, invalid endpoint
    /// paths, or zero durations
    pub fn load(config_path: Option<&Path>, base_url: Option<&str>) -> Result<Self> {
        let fc = file::load_config_file(config_path);

        // Backend (override > env > toml > default)
        let base = base_url
            .map(str::to_string)
            .or_else(|| std::env::var("TALKBACK_BASE_URL").ok())
            .or(fc.backend.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let request_timeout_secs = require_nonzero(
            std::env::var("TALKBACK_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.backend.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            "backend.request_timeout_secs",
        )?;
        let backend = BackendConfig::resolve(
            &base,
            fc.backend.stt_path.as_deref().unwrap_or(DEFAULT_STT_PATH),
            fc.backend.chat_path.as_deref().unwrap_or(DEFAULT_CHAT_PATH),
            fc.backend.tts_path.as_deref().unwrap_or(DEFAULT_TTS_PATH),
            fc.backend
                .history_path
                .as_deref()
                .unwrap_or(DEFAULT_HISTORY_PATH),
            Duration::from_secs(request_timeout_secs),
        )?;

        // Capture (env > toml > default)
        let target_sample_rate = fc
            .capture
            .target_sample_rate
            .unwrap_or(DEFAULT_TARGET_SAMPLE_RATE);
        if target_sample_rate == 0 {
            return Err(Error::Config(
                "capture.target_sample_rate must be non-zero".to_string(),
            ));
        }
        let capture = CaptureConfig {
            target_sample_rate,
            input_device: std::env::var("TALKBACK_INPUT_DEVICE")
                .ok()
                .or(fc.capture.input_device),
        };

        // Endpoint detection (toml > default)
        let defaults = EndpointConfig::default();
        let endpoint = EndpointConfig {
            silence_threshold_rms: fc
                .endpoint
                .silence_threshold_rms
                .unwrap_or(defaults.silence_threshold_rms),
            silence_duration: Duration::from_millis(require_nonzero(
                fc.endpoint
                    .silence_duration_ms
                    .unwrap_or_else(|| u64::try_from(defaults.silence_duration.as_millis()).unwrap_or(800)),
                "endpoint.silence_duration_ms",
            )?),
            min_recording: Duration::from_millis(require_nonzero(
                fc.endpoint
                    .min_recording_ms
                    .unwrap_or_else(|| u64::try_from(defaults.min_recording.as_millis()).unwrap_or(500)),
                "endpoint.min_recording_ms",
            )?),
        };

        // Interaction loop (env > toml > default)
        let interaction = InteractionConfig {
            listen_timeout: Duration::from_millis(require_nonzero(
                std::env::var("TALKBACK_LISTEN_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .or(fc.interaction.listen_timeout_ms)
                    .unwrap_or(DEFAULT_LISTEN_TIMEOUT_MS),
                "interaction.listen_timeout_ms",
            )?),
            min_voice_rms: fc
                .interaction
                .min_voice_rms
                .unwrap_or(DEFAULT_MIN_VOICE_RMS),
            history_window: fc
                .interaction
                .history_window
                .unwrap_or(DEFAULT_HISTORY_WINDOW),
        };

        Ok(Self {
            backend,
            capture,
            endpoint,
            interaction,
        })
    }
}
