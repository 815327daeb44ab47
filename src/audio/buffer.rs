//! Sample accumulation and rate conversion

/// Accumulates capture frames into one contiguous mono sample sequence.
///
/// Frames arrive at the device's callback cadence in varying sizes; the
/// buffer copies each one so callback slices are never retained.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Append a capture frame, preserving arrival order
    pub fn push(&mut self, frame: &[f32]) {
        self.samples.extend_from_slice(frame);
    }

    /// Total samples accumulated so far
    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples have been accumulated
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the buffer, yielding the contiguous sample sequence
    #[must_use]
    pub fn flatten(self) -> Vec<f32> {
        self.samples
    }
}

/// Resample mono audio with linear interpolation.
///
/// Equal rates return the input unchanged. Output length is
/// `round(input_len / (source_rate / target_rate))`; each output sample
/// interpolates between its two source neighbors, with out-of-range
/// neighbors contributing zero.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let output_len = (samples.len() as f64 / ratio).round() as usize;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - pos.floor()) as f32;
            let before = samples.get(idx).copied().unwrap_or(0.0);
            let after = samples.get(idx + 1).copied().unwrap_or(0.0);
            (1.0 - frac).mul_add(before, frac * after)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_order_across_frames() {
        let mut buffer = SampleBuffer::new();
        buffer.push(&[0.1, 0.2]);
        buffer.push(&[]);
        buffer.push(&[0.3]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.flatten(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn empty_buffer_flattens_to_nothing() {
        let buffer = SampleBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.flatten().is_empty());
    }

    #[test]
    fn equal_rates_are_identity() {
        let input = vec![0.5, -0.25, 0.125];
        assert_eq!(resample(&input, 48_000, 48_000), input);
    }

    #[test]
    fn output_length_follows_rate_ratio() {
        let input = vec![0.0; 48_000];
        assert_eq!(resample(&input, 48_000, 16_000).len(), 16_000);
        assert_eq!(resample(&input, 48_000, 24_000).len(), 24_000);
        // Upsampling is also supported (device rates below the target)
        let short = vec![0.0; 8_000];
        assert_eq!(resample(&short, 8_000, 16_000).len(), 16_000);
    }

    #[test]
    fn interpolates_between_neighbors() {
        // Halving 16k -> 8k picks every other position exactly
        let input = vec![0.0, 1.0, 0.0, 1.0];
        let out = resample(&input, 16_000, 8_000);
        assert_eq!(out, vec![0.0, 0.0]);

        // Doubling interpolates midpoints
        let out = resample(&[0.0, 1.0], 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_neighbors_contribute_zero() {
        // The last interpolation points past the input; the missing
        // neighbor reads as zero rather than clamping to the edge
        let out = resample(&[1.0, 1.0], 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
    }
}
