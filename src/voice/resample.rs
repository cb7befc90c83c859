//! Sample rate conversion between device and pipeline rates
//!
//! Pure rate conversion: at most one partial input chunk is held between calls.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk size handed to the FFT resampler, per channel
const CHUNK_FRAMES: usize = 1024;

/// Streaming converter for interleaved audio
pub struct RateConverter {
    resampler: FftFixedIn<f32>,
    channels: usize,
    from: u32,
    to: u32,
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `from` Hz to `to` Hz for `channels` interleaved channels
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects the rate pair
    pub fn new(from: u32, to: u32, channels: u16) -> Result<Self> {
        let channels = usize::from(channels.max(1));
        let resampler = FftFixedIn::<f32>::new(
            from as usize,
            to as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )
        .map_err(|e| Error::Resample(e.to_string()))?;

        tracing::debug!(from, to, channels, "rate converter initialized");

        Ok(Self {
            resampler,
            channels,
            from,
            to,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
        })
    }

    /// Source rate
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from
    }

    /// Target rate
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to
    }

    /// Feed interleaved samples, returning whatever converted output is ready
    ///
    /// # Errors
    ///
    /// Returns error if the resampler fails
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        for (i, &sample) in interleaved.iter().enumerate() {
            self.pending[i % self.channels].push(sample);
        }

        let mut out = vec![Vec::new(); self.channels];
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|c| c.drain(..needed).collect())
                .collect();
            let processed = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| Error::Resample(e.to_string()))?;
            for (o, p) in out.iter_mut().zip(processed) {
                o.extend(p);
            }
        }

        Ok(interleave(&out))
    }

    /// Convert the remaining partial chunk, padding with silence
    ///
    /// # Errors
    ///
    /// Returns error if the resampler fails
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }
        let tail: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let processed = self
            .resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Resample(e.to_string()))?;
        Ok(interleave(&processed))
    }

    /// Drop buffered input and resampler history
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be rebuilt
    pub fn reset(&mut self) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let channels = self.channels as u16;
        *self = Self::new(self.from, self.to, channels)?;
        Ok(())
    }
}

/// Convert a whole interleaved clip in one go
///
/// # Errors
///
/// Returns error if the resampler fails
pub fn convert_clip(samples: &[f32], from: u32, to: u32, channels: u16) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut converter = RateConverter::new(from, to, channels)?;
    let mut out = converter.push(samples)?;
    out.extend(converter.finish()?);
    Ok(out)
}

/// Interleave per-channel buffers of equal length
fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = channels.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut out = Vec::with_capacity(frames * channels.len());
    for i in 0..frames {
        for c in channels {
            out.push(c.get(i).copied().unwrap_or(0.0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave() {
        let left = vec![1.0, 3.0];
        let right = vec![2.0, 4.0];
        assert_eq!(interleave(&[left, right]), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_same_rate_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(convert_clip(&samples, 16000, 16000, 1).unwrap(), samples);
    }

    #[test]
    fn test_downsample_length() {
        let samples = vec![0.0f32; 48000];
        let out = convert_clip(&samples, 48000, 16000, 1).unwrap();
        // One second in, roughly one second out (plus resampler delay padding)
        assert!(out.len() >= 15000, "got {}", out.len());
        assert!(out.len() <= 17500, "got {}", out.len());
    }

    #[test]
    fn test_partial_chunk_is_held() {
        let mut converter = RateConverter::new(48000, 16000, 1).unwrap();
        let out = converter.push(&[0.0; 100]).unwrap();
        assert!(out.is_empty());
        let tail = converter.finish().unwrap();
        assert!(!tail.is_empty());
    }
}
