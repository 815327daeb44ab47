//! WAV wire codec
//!
//! Captures go to the backend as 16-bit little-endian mono PCM with the
//! canonical 44-byte header; synthesized replies come back as either WAV or
//! MP3 and are decoded to f32 for playback.

use std::io::Cursor;

use crate::{Error, Result};

/// Encode mono f32 samples as a 16-bit PCM WAV file
///
/// Output is exactly 44 header bytes plus two bytes per sample.
///
/// # Errors
///
/// Returns `Error::Audio` if the writer fails
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| Error::Audio(format!("failed to create WAV writer: {e}")))?;

    for &sample in samples {
        writer
            .write_sample(sample_to_i16(sample))
            .map_err(|e| Error::Audio(format!("failed to write WAV sample: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| Error::Audio(format!("failed to finalize WAV: {e}")))?;

    Ok(cursor.into_inner())
}

/// Decode a PCM WAV file to mono f32 samples and its sample rate
///
/// Multi-channel files are downmixed by averaging across channels.
///
/// # Errors
///
/// Returns `Error::Audio` for malformed data or an unsupported sample format
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Audio(format!("failed to read WAV: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| {
                s.map(|v| f32::from(v) / 32_768.0)
                    .map_err(|e| Error::Audio(format!("bad WAV sample: {e}")))
            })
            .collect::<Result<_>>()?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| Error::Audio(format!("bad WAV sample: {e}"))))
            .collect::<Result<_>>()?,
    };

    Ok((downmix(&interleaved, spec.channels), spec.sample_rate))
}

/// Full-range signed-16 mapping: negative samples scale by 32768,
/// non-negative by 32767, truncating toward zero.
#[allow(clippy::cast_possible_truncation)]
fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32_768.0) as i16
    } else {
        (clamped * 32_767.0) as i16
    }
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    if channels == 2 {
        return interleaved
            .chunks_exact(2)
            .map(|pair| f32::midpoint(pair[0], pair[1]))
            .collect();
    }
    let channels = usize::from(channels);
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            #[allow(clippy::cast_precision_loss)]
            let width = channels as f32;
            frame.iter().sum::<f32>() / width
        })
        .collect()
}
