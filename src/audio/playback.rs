//! Playback of synthesized replies
//!
//! Replies arrive as MP3 or WAV bytes; they are decoded to mono f32 and
//! played on the default output device at the decoded rate when the device
//! supports it. `play` returns a handle that resolves when the audio runs
//! out; dropping the handle stops the stream immediately, which is how
//! barge-in cancellation works.

use std::io::Cursor;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use crate::audio::buffer::resample;
use crate::audio::wav::decode_wav;
use crate::{Error, Result};

/// Decoded reply audio ready for the output device
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,

    /// Rate the samples were decoded at
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playable length of the audio
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Sniff and decode a synthesized reply body
///
/// The content type is consulted first; without a usable hint the payload
/// magic decides (RIFF/WAVE versus an MP3 sync word or ID3 tag).
///
/// # Errors
///
/// Returns `Error::Audio` for an empty body or undecodable payload
pub fn decode_reply(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(Error::Audio("empty audio reply".to_string()));
    }
    let hint = content_type.unwrap_or("");
    if hint.contains("wav") || looks_like_wav(bytes) {
        let (samples, sample_rate) = decode_wav(bytes)?;
        return Ok(DecodedAudio {
            samples,
            sample_rate,
        });
    }
    decode_mp3(bytes)
}

fn looks_like_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Decode MP3 bytes to mono f32 samples at the stream's frame rate
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32_768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32_768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32_768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Audio(
            "MP3 stream contained no audio frames".to_string(),
        ));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Output device abstraction; `play` returns once the stream is rolling
pub trait AudioOutput {
    /// Start playing decoded audio
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device rejects the stream
    fn play(&mut self, audio: DecodedAudio) -> Result<PlaybackHandle>;
}

/// Handle to an active playback
///
/// Dropping the handle (or the future returned by [`finished`]) releases the
/// output stream and stops the audio immediately.
///
/// [`finished`]: PlaybackHandle::finished
pub struct PlaybackHandle {
    _stream: Option<cpal::Stream>,
    done: oneshot::Receiver<()>,
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `cpal::Stream` has no `Debug` impl, so the handle formats opaquely
        f.debug_struct("PlaybackHandle").finish_non_exhaustive()
    }
}

impl PlaybackHandle {
    pub(crate) const fn new(stream: Option<cpal::Stream>, done: oneshot::Receiver<()>) -> Self {
        Self {
            _stream: stream,
            done,
        }
    }

    /// Resolve when the audio has been fully rendered
    pub async fn finished(self) {
        // A dropped sender also counts as done
        let _ = self.done.await;
    }
}

/// Plays decoded replies on the default output device
pub struct CpalOutput {
    device: cpal::Device,
}

impl CpalOutput {
    /// Bind the default output device
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        tracing::debug!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            "output device ready"
        );

        Ok(Self { device })
    }

    /// Find a mono (or stereo) output config supporting the given rate
    fn negotiate(&self, rate: u32) -> Option<cpal::StreamConfig> {
        let target = SampleRate(rate);
        let in_range = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= target && c.max_sample_rate() >= target
        };

        let supported = self
            .device
            .supported_output_configs()
            .ok()?
            .find(|c| c.channels() == 1 && in_range(c))
            .or_else(|| {
                self.device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && in_range(c))
            })?;

        Some(supported.with_sample_rate(target).config())
    }
}

impl AudioOutput for CpalOutput {
    fn play(&mut self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let (done_tx, done_rx) = oneshot::channel();

        if audio.samples.is_empty() {
            let _ = done_tx.send(());
            return Ok(PlaybackHandle::new(None, done_rx));
        }

        // Prefer the decoded rate; otherwise resample to the device default
        let (mut samples, config) = match self.negotiate(audio.sample_rate) {
            Some(config) => (audio.samples, config),
            None => {
                let default = self
                    .device
                    .default_output_config()
                    .map_err(|e| Error::Playback(format!("failed to get output config: {e}")))?;
                let device_rate = default.sample_rate().0;
                tracing::warn!(
                    decoded_rate = audio.sample_rate,
                    device_rate,
                    "output device does not support decoded rate, resampling"
                );
                (
                    resample(&audio.samples, audio.sample_rate, device_rate),
                    default.config(),
                )
            }
        };

        // Pad with 100 ms of silence so the tail is rendered before done fires
        let pad = usize::try_from(config.sample_rate.0 / 10).unwrap_or(2_400);
        samples.resize(samples.len() + pad, 0.0);

        let channels = usize::from(config.channels);
        let total = samples.len();
        let mut position = 0usize;
        let mut done_tx = Some(done_tx);

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                        if position < total {
                            position += 1;
                        }
                    }
                    if position >= total {
                        if let Some(tx) = done_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "playback stream error");
                },
                None,
            )
            .map_err(|e| Error::Playback(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Playback(format!("failed to start output stream: {e}")))?;

        tracing::debug!(
            samples = total - pad,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "playback started"
        );

        Ok(PlaybackHandle::new(Some(stream), done_rx))
    }
}

#[derive(Debug, Default)]
struct ScriptedOutputState {
    hold: bool,
    played: Vec<(usize, u32)>,
    pending: Vec<oneshot::Sender<()>>,
    fail: Option<String>,
}

/// Deterministic output for tests
///
/// Records what was played; handles either resolve immediately or stay
/// pending until [`release_all`]. Clones share state.
///
/// [`release_all`]: ScriptedOutput::release_all
#[derive(Debug, Clone, Default)]
pub struct ScriptedOutput {
    state: std::sync::Arc<std::sync::Mutex<ScriptedOutputState>>,
}

impl ScriptedOutput {
    /// Output whose handles resolve as soon as `play` returns
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Output whose handles stay pending until [`release_all`]
    ///
    /// [`release_all`]: ScriptedOutput::release_all
    #[must_use]
    pub fn held() -> Self {
        let output = Self::default();
        if let Ok(mut state) = output.state.lock() {
            state.hold = true;
        }
        output
    }

    /// Make `play` fail with the given message
    #[must_use]
    pub fn with_failure(self, message: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail = Some(message.to_string());
        }
        self
    }

    /// Resolve every pending handle
    pub fn release_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            for tx in state.pending.drain(..) {
                let _ = tx.send(());
            }
        }
    }

    /// Number of `play` calls observed
    #[must_use]
    pub fn play_count(&self) -> usize {
        self.state.lock().map_or(0, |s| s.played.len())
    }

    /// Sample count and rate of the most recent `play`
    #[must_use]
    pub fn last_played(&self) -> Option<(usize, u32)> {
        self.state.lock().ok().and_then(|s| s.played.last().copied())
    }
}

impl AudioOutput for ScriptedOutput {
    fn play(&mut self, audio: DecodedAudio) -> Result<PlaybackHandle> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Playback("script poisoned".to_string()))?;
        if let Some(message) = &state.fail {
            return Err(Error::Playback(message.clone()));
        }
        state.played.push((audio.samples.len(), audio.sample_rate));

        let (tx, rx) = oneshot::channel();
        if state.hold {
            state.pending.push(tx);
        } else {
            let _ = tx.send(());
        }
        Ok(PlaybackHandle::new(None, rx))
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready};

    use super::*;
    use crate::audio::wav::encode_wav;

    #[test]
    fn sniffs_wav_by_magic_without_a_hint() {
        let wav = encode_wav(&[0.1_f32; 480], 24_000).unwrap();
        let decoded = decode_reply(&wav, None).unwrap();
        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), 480);
    }

    #[test]
    fn content_type_hint_routes_to_wav() {
        let wav = encode_wav(&[0.0_f32; 160], 16_000).unwrap();
        let decoded = decode_reply(&wav, Some("audio/wav")).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
    }

    #[test]
    fn rejects_empty_and_undecodable_bodies() {
        assert!(decode_reply(&[], None).is_err());
        assert!(decode_reply(&[0x00, 0x01, 0x02, 0x03], Some("audio/mpeg")).is_err());
    }

    #[test]
    fn duration_reflects_rate() {
        let audio = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert_eq!(audio.duration(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn immediate_handle_resolves_without_release() {
        let mut output = ScriptedOutput::new();
        let handle = output
            .play(DecodedAudio {
                samples: vec![0.0; 8],
                sample_rate: 16_000,
            })
            .unwrap();
        let mut fut = tokio_test::task::spawn(handle.finished());
        assert_ready!(fut.poll());
        assert_eq!(output.play_count(), 1);
        assert_eq!(output.last_played(), Some((8, 16_000)));
    }

    #[test]
    fn held_handle_resolves_on_release() {
        let mut output = ScriptedOutput::held();
        let handle = output
            .play(DecodedAudio {
                samples: vec![0.0; 8],
                sample_rate: 16_000,
            })
            .unwrap();
        let mut fut = tokio_test::task::spawn(handle.finished());
        assert_pending!(fut.poll());
        output.release_all();
        assert_ready!(fut.poll());
    }

    #[test]
    fn failure_mode_surfaces_playback_error() {
        let mut output = ScriptedOutput::new().with_failure("device gone");
        let err = output
            .play(DecodedAudio {
                samples: vec![0.0; 8],
                sample_rate: 16_000,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
    }
}
