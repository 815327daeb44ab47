//! Capture sources feeding the recording pipeline
//!
//! `CpalSource` wraps the default (or named) input device; `WavFileSource`
//! replays a WAV file through the same pipeline; `ScriptedSource` drives
//! deterministic tests without touching audio hardware.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::wav::decode_wav;
use crate::{Error, Result};

/// A source of mono f32 capture frames
///
/// `read_frames` drains whatever arrived since the last call; an empty read
/// from a finite source means it is exhausted.
pub trait CaptureSource {
    /// Begin capturing; a second `open` without `close` is an error
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the device or stream cannot be started
    fn open(&mut self) -> Result<()>;

    /// Drain the frames captured since the last call
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the source is not open or reading fails
    fn read_frames(&mut self) -> Result<Vec<f32>>;

    /// Release the device; idempotent, teardown errors are logged not raised
    fn close(&mut self);

    /// Native rate of the frames returned by `read_frames`
    fn sample_rate(&self) -> u32;

    /// True when the source delivers a bounded recording (e.g. a file)
    fn is_finite(&self) -> bool {
        false
    }
}

/// Microphone capture via cpal
///
/// The device callback pushes converted mono samples into a shared buffer;
/// `read_frames` drains it. The device and its native config are negotiated
/// once at construction so a missing microphone surfaces at startup.
pub struct CpalSource {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<cpal::Stream>,
}

impl CpalSource {
    /// Bind the default input device, or the first whose name contains
    /// `preferred`
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if no matching device exists or its config
    /// cannot be read
    pub fn new(preferred: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match preferred {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::Capture(format!("failed to enumerate input devices: {e}")))?
                .find(|d| d.name().is_ok_and(|n| n.contains(name)))
                .ok_or_else(|| Error::Capture(format!("no input device matching '{name}'")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| Error::Capture("no input device available".to_string()))?,
        };

        let config = device
            .default_input_config()
            .map_err(|e| Error::Capture(format!("failed to get input config: {e}")))?;

        tracing::debug!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            format = ?config.sample_format(),
            "input device ready"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }
}

impl CaptureSource for CpalSource {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Capture("capture is already open".to_string()));
        }

        // A fresh session must not see frames from a previous one
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }

        let stream_config: cpal::StreamConfig = self.config.clone().into();
        let channels = stream_config.channels;

        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => {
                let buffer = Arc::clone(&self.buffer);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push_mono(&buffer, data, channels);
                    },
                    log_stream_error,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let buffer = Arc::clone(&self.buffer);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> =
                            data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                        push_mono(&buffer, &converted, channels);
                    },
                    log_stream_error,
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let buffer = Arc::clone(&self.buffer);
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> = data
                            .iter()
                            .map(|&s| (f32::from(s) - 32_768.0) / 32_768.0)
                            .collect();
                        push_mono(&buffer, &converted, channels);
                    },
                    log_stream_error,
                    None,
                )
            }
            other => {
                return Err(Error::Capture(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| Error::Capture(format!("failed to build capture stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Capture(format!("failed to start capture stream: {e}")))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn read_frames(&mut self) -> Result<Vec<f32>> {
        if self.stream.is_none() {
            return Err(Error::Capture("capture is not open".to_string()));
        }
        let mut buf = self
            .buffer
            .lock()
            .map_err(|_| Error::Capture("capture buffer poisoned".to_string()))?;
        Ok(std::mem::take(&mut *buf))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("capture stream released");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }
}

fn log_stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "capture stream error");
}

/// Downmix an interleaved callback frame to mono and append it
fn push_mono(buffer: &Arc<Mutex<Vec<f32>>>, data: &[f32], channels: u16) {
    let Ok(mut buf) = buffer.lock() else {
        return;
    };
    if channels <= 1 {
        buf.extend_from_slice(data);
        return;
    }
    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let width = channels as f32;
    buf.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / width),
    );
}

/// Replays a WAV file through the capture pipeline in 100 ms chunks
pub struct WavFileSource {
    samples: Vec<f32>,
    position: usize,
    chunk: usize,
    sample_rate: u32,
    open: bool,
}

impl WavFileSource {
    /// Decode a WAV file into a finite capture source
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read or `Error::Audio` if
    /// it does not decode
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let (samples, sample_rate) = decode_wav(&bytes)?;
        tracing::debug!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate,
            "loaded WAV capture source"
        );
        Ok(Self {
            samples,
            position: 0,
            chunk: usize::try_from(sample_rate / 10).unwrap_or(1_600).max(1),
            sample_rate,
            open: false,
        })
    }
}

impl CaptureSource for WavFileSource {
    fn open(&mut self) -> Result<()> {
        self.position = 0;
        self.open = true;
        Ok(())
    }

    fn read_frames(&mut self) -> Result<Vec<f32>> {
        if !self.open {
            return Err(Error::Capture("capture is not open".to_string()));
        }
        let end = (self.position + self.chunk).min(self.samples.len());
        let frame = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Script {
    frames: VecDeque<Vec<f32>>,
    open: bool,
    open_count: usize,
    close_count: usize,
    fail_open: Option<String>,
    fail_read: Option<String>,
}

/// Deterministic capture source for tests
///
/// Yields one scripted frame per `read_frames` call, then empty reads.
/// Clones share state, so a test can keep one for assertions after moving
/// the other into a recorder.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    sample_rate: u32,
    finite: bool,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    /// Infinite silent source at 16 kHz
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            sample_rate: 16_000,
            finite: false,
        }
    }

    /// Queue the frames returned by successive reads
    #[must_use]
    pub fn with_frames(self, frames: Vec<Vec<f32>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.frames = frames.into();
        }
        self
    }

    /// Report frames at this native rate
    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Make `open` fail with the given message
    #[must_use]
    pub fn with_open_failure(self, message: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.fail_open = Some(message.to_string());
        }
        self
    }

    /// Make `read_frames` fail with the given message
    #[must_use]
    pub fn with_read_failure(self, message: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.fail_read = Some(message.to_string());
        }
        self
    }

    /// Report exhaustion once the scripted frames run out
    #[must_use]
    pub const fn finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// True while the source is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.script.lock().is_ok_and(|s| s.open)
    }

    /// Number of successful opens
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.script.lock().map_or(0, |s| s.open_count)
    }

    /// Number of open-to-closed transitions
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.script.lock().map_or(0, |s| s.close_count)
    }
}

impl CaptureSource for ScriptedSource {
    fn open(&mut self) -> Result<()> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| Error::Capture("script poisoned".to_string()))?;
        if let Some(message) = &script.fail_open {
            return Err(Error::Capture(message.clone()));
        }
        if script.open {
            return Err(Error::Capture("capture is already open".to_string()));
        }
        script.open = true;
        script.open_count += 1;
        Ok(())
    }

    fn read_frames(&mut self) -> Result<Vec<f32>> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| Error::Capture("script poisoned".to_string()))?;
        if !script.open {
            return Err(Error::Capture("capture is not open".to_string()));
        }
        if let Some(message) = &script.fail_read {
            return Err(Error::Capture(message.clone()));
        }
        Ok(script.frames.pop_front().unwrap_or_default())
    }

    fn close(&mut self) {
        if let Ok(mut script) = self.script.lock() {
            if script.open {
                script.open = false;
                script.close_count += 1;
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_yields_frames_in_order() {
        let mut source = ScriptedSource::new()
            .with_frames(vec![vec![0.1, 0.2], vec![0.3]])
            .finite();
        source.open().unwrap();
        assert_eq!(source.read_frames().unwrap(), vec![0.1, 0.2]);
        assert_eq!(source.read_frames().unwrap(), vec![0.3]);
        assert!(source.read_frames().unwrap().is_empty());
        assert!(source.is_finite());
    }

    #[test]
    fn scripted_source_enforces_lifecycle() {
        let mut source = ScriptedSource::new();
        assert!(source.read_frames().is_err());
        source.open().unwrap();
        assert!(source.open().is_err());
        source.close();
        source.close();
        assert_eq!(source.open_count(), 1);
        assert_eq!(source.close_count(), 1);
    }

    #[test]
    fn scripted_clones_share_state() {
        let probe = ScriptedSource::new();
        let mut moved = probe.clone();
        moved.open().unwrap();
        assert!(probe.is_open());
        moved.close();
        assert!(!probe.is_open());
    }

    #[test]
    fn capture_source_is_object_safe() {
        let mut source: Box<dyn CaptureSource> = Box::new(ScriptedSource::new());
        source.open().unwrap();
        assert_eq!(source.sample_rate(), 16_000);
        source.close();
    }
}
