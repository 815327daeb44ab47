//! Capture session lifecycle
//!
//! A `Recorder` owns a capture source across sessions. `start` acquires the
//! device, `pump` drains pending frames into the buffer and watches for the
//! endpoint, and exactly one of `stop` or `cancel` finalizes the session.
//! `stop` resamples the take to the upload rate and encodes it as WAV.

use std::time::Duration;

use crate::audio::buffer::{SampleBuffer, resample};
use crate::audio::capture::CaptureSource;
use crate::audio::endpoint::{Clock, EndpointConfig, EndpointDetector, SystemClock};
use crate::audio::wav::encode_wav;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Recording,
    Finalized,
}

/// A finalized capture ready for transcription
#[derive(Debug, Clone)]
pub struct Utterance {
    /// 16-bit mono PCM WAV at the upload rate
    pub wav: Vec<u8>,

    /// Loudest frame RMS observed during the session
    pub peak_rms: f32,

    /// Length of the take at the source's native rate
    pub duration: Duration,
}

/// Result of one pump pass over pending capture frames
#[derive(Debug, Clone, Copy)]
pub struct PumpStatus {
    /// RMS of the most recent frame (the last observed one when none arrived)
    pub level: f32,

    /// True once the endpoint detector has fired this session
    pub endpoint_reached: bool,

    /// True when a finite source has run out of frames
    pub source_exhausted: bool,
}

impl PumpStatus {
    /// True when the session should be finalized
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.endpoint_reached || self.source_exhausted
    }
}

/// Drives one capture source through start/pump/stop sessions
pub struct Recorder<S: CaptureSource, C: Clock + Clone = SystemClock> {
    source: S,
    endpoint: EndpointConfig,
    target_rate: u32,
    clock: C,
    state: RecorderState,
    buffer: SampleBuffer,
    detector: EndpointDetector<C>,
    last_level: f32,
}

impl<S: CaptureSource> Recorder<S> {
    /// Create a recorder over a source, uploading at `target_rate`
    pub fn new(source: S, endpoint: EndpointConfig, target_rate: u32) -> Self {
        Self::with_clock(source, endpoint, target_rate, SystemClock)
    }
}

impl<S: CaptureSource, C: Clock + Clone> Recorder<S, C> {
    /// Create a recorder with an injected clock for the endpoint detector
    pub fn with_clock(source: S, endpoint: EndpointConfig, target_rate: u32, clock: C) -> Self {
        let detector = EndpointDetector::with_clock(endpoint, clock.clone());
        Self {
            source,
            endpoint,
            target_rate,
            clock,
            state: RecorderState::Idle,
            buffer: SampleBuffer::new(),
            detector,
            last_level: 0.0,
        }
    }

    /// Begin a capture session
    ///
    /// Any prior session's leftovers are torn down first; a fresh session
    /// never sees old frames.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if a session is already recording, or
    /// `Error::Capture` if the source cannot be opened
    pub fn start(&mut self) -> Result<()> {
        if self.state == RecorderState::Recording {
            return Err(Error::InvalidState(
                "recording already in progress".to_string(),
            ));
        }

        self.source.close();
        self.buffer = SampleBuffer::new();
        self.last_level = 0.0;
        self.source.open()?;
        self.detector = EndpointDetector::with_clock(self.endpoint, self.clock.clone());
        self.state = RecorderState::Recording;
        tracing::debug!(sample_rate = self.source.sample_rate(), "recording started");
        Ok(())
    }

    /// Drain pending frames into the buffer and observe them
    ///
    /// Call this at display cadence while listening; the returned status
    /// carries the level-meter reading and whether the session should end.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` outside a session or `Error::Capture`
    /// if the source fails
    pub fn pump(&mut self) -> Result<PumpStatus> {
        if self.state != RecorderState::Recording {
            return Err(Error::InvalidState(
                "recording has not been started".to_string(),
            ));
        }

        let frame = self.source.read_frames()?;
        if frame.is_empty() {
            return Ok(PumpStatus {
                level: self.last_level,
                endpoint_reached: self.detector.endpoint_reached(),
                source_exhausted: self.source.is_finite(),
            });
        }

        let observation = self.detector.observe(&frame);
        self.buffer.push(&frame);
        self.last_level = observation.rms;
        if observation.endpoint {
            tracing::debug!(samples = self.buffer.len(), "endpoint reached");
        }

        Ok(PumpStatus {
            level: observation.rms,
            endpoint_reached: self.detector.endpoint_reached(),
            source_exhausted: false,
        })
    }

    /// Finalize the session into an [`Utterance`]
    ///
    /// The device is always released, even when finalization fails.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` outside a session, `Error::EmptyRecording`
    /// when no samples arrived, or `Error::Audio` if encoding fails
    pub fn stop(&mut self) -> Result<Utterance> {
        if self.state != RecorderState::Recording {
            return Err(Error::InvalidState(
                "recording has not been started".to_string(),
            ));
        }

        // Drain the tail still queued, then release the device
        if let Ok(tail) = self.source.read_frames() {
            if !tail.is_empty() {
                self.detector.observe(&tail);
                self.buffer.push(&tail);
            }
        }
        self.source.close();
        self.state = RecorderState::Finalized;

        let samples = std::mem::take(&mut self.buffer).flatten();
        if samples.is_empty() {
            return Err(Error::EmptyRecording);
        }

        let native_rate = self.source.sample_rate();
        if native_rate == 0 {
            return Err(Error::Capture(
                "source reported a zero sample rate".to_string(),
            ));
        }

        #[allow(clippy::cast_precision_loss)]
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(native_rate));
        let resampled = resample(&samples, native_rate, self.target_rate);
        let wav = encode_wav(&resampled, self.target_rate)?;
        let peak_rms = self.detector.peak_rms();

        tracing::debug!(
            samples = samples.len(),
            native_rate,
            target_rate = self.target_rate,
            wav_bytes = wav.len(),
            peak_rms,
            "recording finalized"
        );

        Ok(Utterance {
            wav,
            peak_rms,
            duration,
        })
    }

    /// Discard the session without producing an utterance
    ///
    /// Teardown is best-effort; the device is released and the buffer
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` outside a session
    pub fn cancel(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::InvalidState(
                "recording has not been started".to_string(),
            ));
        }
        self.source.close();
        self.buffer = SampleBuffer::new();
        self.state = RecorderState::Finalized;
        tracing::debug!("recording cancelled");
        Ok(())
    }

    /// True while a session is active
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::*;
    use crate::audio::capture::ScriptedSource;

    /// Clock advancing a fixed step on every read, simulating pump cadence
    #[derive(Clone)]
    struct StepClock {
        now: Arc<Mutex<Instant>>,
        step: Duration,
    }

    impl StepClock {
        fn new(step: Duration) -> Self {
            Self {
                now: Arc::new(Mutex::new(Instant::now())),
                step,
            }
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Instant {
            let mut now = self.now.lock().unwrap();
            *now += self.step;
            *now
        }
    }

    fn endpoint_config() -> EndpointConfig {
        EndpointConfig {
            silence_threshold_rms: 0.01,
            silence_duration: Duration::from_millis(200),
            min_recording: Duration::from_millis(100),
        }
    }

    fn loud_frame() -> Vec<f32> {
        vec![0.5, -0.5, 0.5, -0.5]
    }

    fn quiet_frame() -> Vec<f32> {
        vec![0.001, -0.001, 0.001, -0.001]
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut recorder = Recorder::new(ScriptedSource::new(), endpoint_config(), 16_000);
        recorder.start().unwrap();
        assert!(matches!(recorder.start(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn stop_and_cancel_require_a_session() {
        let mut recorder = Recorder::new(ScriptedSource::new(), endpoint_config(), 16_000);
        assert!(matches!(recorder.stop(), Err(Error::InvalidState(_))));
        assert!(matches!(recorder.cancel(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn stop_after_cancel_is_an_error() {
        let mut recorder = Recorder::new(ScriptedSource::new(), endpoint_config(), 16_000);
        recorder.start().unwrap();
        recorder.cancel().unwrap();
        assert!(matches!(recorder.stop(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn empty_session_reports_empty_recording_and_releases_the_device() {
        let probe = ScriptedSource::new();
        let mut recorder = Recorder::new(probe.clone(), endpoint_config(), 16_000);
        recorder.start().unwrap();
        assert!(matches!(recorder.stop(), Err(Error::EmptyRecording)));
        assert!(!probe.is_open());
        assert_eq!(probe.close_count(), 1);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn read_failure_leaves_cancel_as_a_clean_exit() {
        let probe = ScriptedSource::new().with_read_failure("device unplugged");
        let mut recorder = Recorder::new(probe.clone(), endpoint_config(), 16_000);
        recorder.start().unwrap();
        assert!(matches!(recorder.pump(), Err(Error::Capture(_))));
        recorder.cancel().unwrap();
        assert!(!probe.is_open());
    }

    #[test]
    fn endpoint_fires_through_pump() {
        let frames: Vec<Vec<f32>> = (0..3)
            .map(|_| loud_frame())
            .chain((0..8).map(|_| quiet_frame()))
            .collect();
        let source = ScriptedSource::new().with_frames(frames);
        let clock = StepClock::new(Duration::from_millis(50));
        let mut recorder = Recorder::with_clock(source, endpoint_config(), 16_000, clock);

        recorder.start().unwrap();
        let mut fired = false;
        for _ in 0..20 {
            let status = recorder.pump().unwrap();
            if status.endpoint_reached {
                fired = true;
                break;
            }
        }
        assert!(fired, "endpoint never fired");
        assert!(recorder.is_recording());

        let utterance = recorder.stop().unwrap();
        assert!(utterance.peak_rms > 0.4);
        assert!(!utterance.wav.is_empty());
    }

    #[test]
    fn stop_resamples_to_the_target_rate() {
        // 32 kHz source halves to 16 kHz: 64 samples in, 32 out
        let frames: Vec<Vec<f32>> = (0..16).map(|_| loud_frame()).collect();
        let source = ScriptedSource::new()
            .with_frames(frames)
            .with_sample_rate(32_000);
        let mut recorder = Recorder::new(source, endpoint_config(), 16_000);

        recorder.start().unwrap();
        for _ in 0..20 {
            recorder.pump().unwrap();
        }
        let utterance = recorder.stop().unwrap();
        assert_eq!(utterance.wav.len(), 44 + 2 * 32);
        assert_eq!(utterance.duration, Duration::from_secs_f64(64.0 / 32_000.0));
    }

    #[test]
    fn restart_after_finalize_opens_a_fresh_session() {
        let probe = ScriptedSource::new().with_frames(vec![loud_frame()]);
        let mut recorder = Recorder::new(probe.clone(), endpoint_config(), 16_000);

        recorder.start().unwrap();
        recorder.pump().unwrap();
        let first = recorder.stop().unwrap();
        assert!(!first.wav.is_empty());

        // Refill the shared script and run a second session
        let _ = probe.clone().with_frames(vec![quiet_frame(), quiet_frame()]);
        recorder.start().unwrap();
        recorder.pump().unwrap();
        let second = recorder.stop().unwrap();

        assert_eq!(probe.open_count(), 2);
        assert_eq!(probe.close_count(), 2);
        // Second take contains only the refilled frames
        assert_eq!(second.wav.len(), 44 + 2 * 8);
    }
}
