//! Error types for the talkback client

use thiserror::Error;

/// Result type alias for talkback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the talkback client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(String),

    /// A capture session finalized with zero samples
    #[error("no audio captured")]
    EmptyRecording,

    /// A capture session never rose above the minimum voice level
    #[error("no speech detected (peak level {peak_rms:.4})")]
    InsufficientVoice {
        /// Loudest frame RMS observed during the session
        peak_rms: f32,
    },

    /// Recorder lifecycle misuse (double start, stop before start)
    #[error("invalid recorder state: {0}")]
    InvalidState(String),

    /// Speech-to-text request failed
    #[error("STT error: {0}")]
    Stt(String),

    /// Chat request failed
    #[error("chat error: {0}")]
    Chat(String),

    /// Text-to-speech request failed
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio decode or device negotiation error
    #[error("audio error: {0}")]
    Audio(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
