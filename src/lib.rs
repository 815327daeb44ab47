//! Talkback - push-to-talk voice client for a speech chat backend
//!
//! This library provides the pieces of a terminal voice assistant client:
//! - Microphone capture with silence-based endpoint detection
//! - WAV encoding and MP3/WAV reply decoding
//! - A four-state interaction loop (idle, listening, processing, speaking)
//! - Thin HTTP wrappers around the backend's STT, chat, and TTS endpoints
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Voice Agent                        │
//! │   Idle │ Listening │ Processing │ Speaking          │
//! └──────┬──────────────────┬───────────────┬───────────┘
//!        │                  │               │
//! ┌──────▼──────┐   ┌───────▼───────┐   ┌───▼─────────┐
//! │  Recorder   │   │    Backend    │   │  Playback   │
//! │ mic → WAV   │   │ stt chat tts  │   │ MP3/WAV out │
//! └─────────────┘   └───────────────┘   └─────────────┘
//! ```

pub mod agent;
pub mod audio;
pub mod backend;
pub mod config;
pub mod console;
pub mod error;
pub mod recorder;

pub use agent::{AgentHandle, InteractionState, VoiceAgent};
pub use backend::{BackendClient, HistoryMessage, SpeechAudio, VoiceBackend};
pub use config::Config;
pub use console::Console;
pub use error::{Error, Result};
pub use recorder::{PumpStatus, Recorder, Utterance};
