//! Utterance capture with silence endpointing
//!
//! Frames are classified as voiced or silent by mean absolute amplitude.
//! An utterance ends after a sustained run of silent frames, or when the
//! hard duration cap is reached.

use std::time::Duration;

use super::frame::{AudioFormat, AudioFrame};
use crate::Result;

/// Number of trailing frames used for the "recent amplitude" metric
const RECENT_WINDOW_FRAMES: usize = 8;

/// Outcome of feeding one frame to the endpointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// Keep capturing
    Continue,
    /// Sustained silence after enough audio
    Endpointed,
    /// Hard duration cap reached
    TimedOut,
}

/// Endpointer thresholds, in the units of the incoming audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// Mean absolute amplitude below which a frame counts as silent
    pub silence_threshold: u16,
    /// Seconds of continuous silence that end an utterance
    pub silence_duration: f64,
    /// Hard cap on utterance length, in seconds
    pub max_duration: f64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 500,
            silence_duration: 1.5,
            max_duration: 30.0,
        }
    }
}

/// Decides when a spoken utterance has finished
#[derive(Debug)]
pub struct Endpointer {
    format: AudioFormat,
    threshold: f64,
    silence_frames_needed: usize,
    max_frames: usize,
    silent_run: usize,
    voiced_frames: usize,
    frames: Vec<AudioFrame>,
}

impl Endpointer {
    /// Create an endpointer for frames in `format`
    #[must_use]
    pub fn new(config: EndpointConfig, format: AudioFormat) -> Self {
        let silence_frames_needed = format.frames_for(config.silence_duration).max(1);
        let max_frames = format.frames_for(config.max_duration).max(1);

        tracing::debug!(
            threshold = config.silence_threshold,
            silence_frames_needed,
            max_frames,
            frame_rate = format.frame_rate(),
            "endpointer configured"
        );

        Self {
            format,
            threshold: f64::from(config.silence_threshold),
            silence_frames_needed,
            max_frames,
            silent_run: 0,
            voiced_frames: 0,
            frames: Vec::new(),
        }
    }

    /// Reset counters and the accumulation buffer
    pub fn start(&mut self) {
        self.silent_run = 0;
        self.voiced_frames = 0;
        self.frames.clear();
    }

    /// Feed one frame, returning whether the utterance is complete
    ///
    /// Every frame is accumulated regardless of the outcome.
    pub fn feed(&mut self, frame: AudioFrame) -> EndpointStatus {
        let amplitude = frame.mean_amplitude();
        // Frames already accumulated before this one
        let prior = self.frames.len();
        self.frames.push(frame);

        if amplitude < self.threshold {
            self.silent_run += 1;
        } else {
            self.silent_run = 0;
            self.voiced_frames += 1;
        }

        tracing::trace!(
            amplitude,
            silent_run = self.silent_run,
            frames = self.frames.len(),
            "endpointer frame"
        );

        if self.silent_run >= self.silence_frames_needed && prior >= self.silence_frames_needed
        {
            tracing::debug!(
                frames = self.frames.len(),
                voiced = self.voiced_frames,
                "utterance endpointed"
            );
            return EndpointStatus::Endpointed;
        }

        if self.frames.len() >= self.max_frames {
            tracing::debug!(frames = self.frames.len(), "utterance hit duration cap");
            return EndpointStatus::TimedOut;
        }

        EndpointStatus::Continue
    }

    /// Freeze the accumulated frames into an utterance and reset
    pub fn finish(&mut self) -> Utterance {
        let utterance = Utterance {
            frames: std::mem::take(&mut self.frames),
            voiced_frames: self.voiced_frames,
            format: self.format,
        };
        self.start();
        utterance
    }

    /// Frames accumulated so far
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Consecutive silent frames needed to endpoint
    #[must_use]
    pub const fn silence_frames_needed(&self) -> usize {
        self.silence_frames_needed
    }

    /// Frame count at which capture times out
    #[must_use]
    pub const fn max_frames(&self) -> usize {
        self.max_frames
    }
}

/// A finalized capture, frozen at endpoint or timeout
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    voiced_frames: usize,
    format: AudioFormat,
}

impl Utterance {
    /// Build an utterance directly from frames
    #[must_use]
    pub fn from_frames(frames: Vec<AudioFrame>, format: AudioFormat, silence_threshold: u16) -> Self {
        let threshold = f64::from(silence_threshold);
        let voiced_frames = frames
            .iter()
            .filter(|f| f.mean_amplitude() >= threshold)
            .count();
        Self {
            frames,
            voiced_frames,
            format,
        }
    }

    /// Captured frames in arrival order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames at or above the silence threshold
    #[must_use]
    pub const fn voiced_frames(&self) -> usize {
        self.voiced_frames
    }

    /// Format of the captured frames
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Total captured duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// Duration of voiced content
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn voiced_duration(&self) -> Duration {
        let rate = self.format.frame_rate();
        if rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.voiced_frames as f64 / rate)
    }

    /// Average amplitude over the trailing window of frames
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn recent_amplitude(&self) -> f64 {
        let start = self.frames.len().saturating_sub(RECENT_WINDOW_FRAMES);
        let window = &self.frames[start..];
        if window.is_empty() {
            return 0.0;
        }
        window.iter().map(AudioFrame::mean_amplitude).sum::<f64>() / window.len() as f64
    }

    /// Whether the capture holds less voiced audio than `min_voiced`
    #[must_use]
    pub fn is_effectively_silent(&self, min_voiced: Duration) -> bool {
        self.voiced_frames == 0 || self.voiced_duration() < min_voiced
    }

    /// Interleaved samples across all frames
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect()
    }

    /// Encode as 16-bit PCM WAV for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), self.format.sample_rate, self.format.channels)
    }
}

/// Convert i16 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(amplitude: i16) -> AudioFrame {
        let format = AudioFormat::default();
        let samples: Vec<i16> = (0..format.frame_len())
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        AudioFrame::new(samples, format.sample_rate, format.channels)
    }

    fn endpointer() -> Endpointer {
        Endpointer::new(EndpointConfig::default(), AudioFormat::default())
    }

    #[test]
    fn test_thresholds_from_frame_rate() {
        let ep = endpointer();
        assert_eq!(ep.silence_frames_needed(), 47);
        assert_eq!(ep.max_frames(), 938);
    }

    #[test]
    fn test_silence_resets_on_sound() {
        let mut ep = endpointer();
        ep.start();
        for _ in 0..60 {
            assert_eq!(ep.feed(frame(2000)), EndpointStatus::Continue);
        }
        for _ in 0..46 {
            assert_eq!(ep.feed(frame(0)), EndpointStatus::Continue);
        }
        // A single voiced frame restarts the silence run
        assert_eq!(ep.feed(frame(2000)), EndpointStatus::Continue);
        for _ in 0..46 {
            assert_eq!(ep.feed(frame(0)), EndpointStatus::Continue);
        }
        assert_eq!(ep.feed(frame(0)), EndpointStatus::Endpointed);
    }

    #[test]
    fn test_pure_silence_needs_prior_frames() {
        let mut ep = endpointer();
        ep.start();
        for _ in 0..47 {
            assert_eq!(ep.feed(frame(0)), EndpointStatus::Continue);
        }
        assert_eq!(ep.feed(frame(0)), EndpointStatus::Endpointed);
        let utterance = ep.finish();
        assert_eq!(utterance.len(), 48);
        assert_eq!(utterance.voiced_frames(), 0);
        assert!(utterance.is_effectively_silent(Duration::from_millis(100)));
    }

    #[test]
    fn test_threshold_boundary_is_voiced() {
        let mut ep = endpointer();
        ep.start();
        ep.feed(frame(500));
        ep.feed(frame(499));
        let utterance = ep.finish();
        assert_eq!(utterance.voiced_frames(), 1);
    }

    #[test]
    fn test_finish_resets() {
        let mut ep = endpointer();
        ep.start();
        ep.feed(frame(1000));
        let first = ep.finish();
        assert_eq!(first.len(), 1);
        assert_eq!(ep.frame_count(), 0);
    }

    #[test]
    fn test_recent_amplitude() {
        let mut ep = endpointer();
        ep.start();
        for _ in 0..10 {
            ep.feed(frame(3000));
        }
        for _ in 0..8 {
            ep.feed(frame(100));
        }
        let utterance = ep.finish();
        assert!((utterance.recent_amplitude() - 100.0).abs() < 1e-9);
    }
}
