//! TOML configuration file loading
//!
//! Supports `~/.config/talkback/config.toml` as a persistent config source.
//! All fields are optional, a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TalkbackConfigFile {
    /// Backend endpoints and timeouts
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Microphone capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// End-of-utterance detection configuration
    #[serde(default)]
    pub endpoint: EndpointFileConfig,

    /// Interaction loop configuration
    #[serde(default)]
    pub interaction: InteractionFileConfig,
}

/// Backend transport configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the speech chat backend (e.g. `http://127.0.0.1:8000`)
    pub base_url: Option<String>,

    /// Transcription endpoint path
    pub stt_path: Option<String>,

    /// Chat endpoint path
    pub chat_path: Option<String>,

    /// Speech synthesis endpoint path
    pub tts_path: Option<String>,

    /// Conversation history endpoint path
    pub history_path: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Microphone capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Sample rate uploaded audio is resampled to
    pub target_sample_rate: Option<u32>,

    /// Input device name (substring match, default device when unset)
    pub input_device: Option<String>,
}

/// End-of-utterance detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct EndpointFileConfig {
    /// Frame RMS at or above which a frame counts as voice
    pub silence_threshold_rms: Option<f32>,

    /// Silence that must elapse after voice before the endpoint fires, in ms
    pub silence_duration_ms: Option<u64>,

    /// Minimum session length before the endpoint may fire, in ms
    pub min_recording_ms: Option<u64>,
}

/// Interaction loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct InteractionFileConfig {
    /// Hard cap on a single listening phase, in ms
    pub listen_timeout_ms: Option<u64>,

    /// Peak RMS a capture must reach before it is sent for transcription
    pub min_voice_rms: Option<f32>,

    /// Number of history messages rendered after a reply
    pub history_window: Option<usize>,
}

/// Load the TOML config file from an explicit path or the standard location
///
/// Returns `TalkbackConfigFile::default()` if the file doesn't exist or can't
/// be parsed. A missing explicit path is warned about; a missing default path
/// is not.
pub fn load_config_file(explicit: Option<&Path>) -> TalkbackConfigFile {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Some(p) => p,
            None => return TalkbackConfigFile::default(),
        },
    };

    if !path.exists() {
        if explicit.is_some() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }
        return TalkbackConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                TalkbackConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TalkbackConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/talkback/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("talkback").join("config.toml"))
}
