//! PCM frame types shared by every stage of the pipeline

use std::time::Duration;

/// Default device sample rate (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Default samples per channel in one frame (~32ms at 16kHz)
pub const FRAME_SIZE: usize = 512;

/// Stream format negotiated with an audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second, per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            frame_size: FRAME_SIZE,
        }
    }
}

impl AudioFormat {
    /// Create a format descriptor
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16, frame_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frame_size,
        }
    }

    /// Frames per second delivered by a source in this format
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_rate(&self) -> f64 {
        f64::from(self.sample_rate) / self.frame_size as f64
    }

    /// Interleaved sample count of one frame
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Number of frames covering `secs` seconds, rounded up
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn frames_for(&self, secs: f64) -> usize {
        if secs <= 0.0 {
            return 0;
        }
        (secs * self.frame_rate()).ceil() as usize
    }
}

/// Fixed-length block of signed 16-bit samples
///
/// Immutable once produced. Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Box<[i16]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Wrap samples captured at `sample_rate` with `channels` interleaved channels
    #[must_use]
    pub fn new(samples: impl Into<Box<[i16]>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// A frame of digital silence in the given format
    #[must_use]
    pub fn silence(format: &AudioFormat) -> Self {
        Self::new(
            vec![0i16; format.frame_len()],
            format.sample_rate,
            format.channels,
        )
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Total sample count across channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate this frame was captured at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Playback duration of this frame
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let per_channel = self.samples.len() / usize::from(self.channels);
        Duration::from_secs_f64(per_channel as f64 / f64::from(self.sample_rate))
    }

    /// Mean absolute amplitude, in PCM sample units
    #[must_use]
    pub fn mean_amplitude(&self) -> f64 {
        mean_amplitude(&self.samples)
    }

    /// RMS energy, in PCM sample units
    #[must_use]
    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }
}

/// Mean absolute amplitude of PCM samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_amplitude(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s).abs()).sum();
    sum / samples.len() as f64
}

/// RMS energy of PCM samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let f = f64::from(s);
            f * f
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert an i16 sample to f32 in [-1.0, 1.0)
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate() {
        let format = AudioFormat::default();
        assert!((format.frame_rate() - 31.25).abs() < f64::EPSILON);
        assert_eq!(format.frames_for(1.5), 47);
        assert_eq!(format.frames_for(30.0), 938);
        assert_eq!(format.frames_for(0.0), 0);
    }

    #[test]
    fn test_frame_len_stereo() {
        let format = AudioFormat::new(48000, 2, 480);
        assert_eq!(format.frame_len(), 960);
        assert!((format.frame_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mean_amplitude() {
        assert!(mean_amplitude(&[]).abs() < f64::EPSILON);
        assert!((mean_amplitude(&[100, -100, 300, -300]) - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(&AudioFormat::default());
        assert_eq!(frame.duration().as_millis(), 32);
        assert!(frame.rms() < 1.0);
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert!((i16_to_f32(-32768) + 1.0).abs() < f32::EPSILON);
    }
}
