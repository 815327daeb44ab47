//! Audio pipeline
//!
//! Capture sources, sample buffering, end-of-utterance detection, the WAV
//! wire codec, and playback of synthesized replies.

pub mod buffer;
pub mod capture;
pub mod endpoint;
pub mod playback;
pub mod wav;

pub use buffer::{SampleBuffer, resample};
pub use capture::{CaptureSource, CpalSource, ScriptedSource, WavFileSource};
pub use endpoint::{Clock, EndpointConfig, EndpointDetector, SystemClock, rms};
pub use playback::{AudioOutput, CpalOutput, DecodedAudio, PlaybackHandle, ScriptedOutput, decode_reply};
pub use wav::{decode_wav, encode_wav};
