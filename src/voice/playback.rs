//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};
use tokio_util::sync::CancellationToken;

use super::resample::convert_clip;
use super::tts::SynthesizedAudio;
use crate::{Error, Result};

/// How often a blocking playback checks for cancellation
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra wait past the nominal clip length before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Somewhere synthesized audio can be heard
///
/// `play` blocks the calling thread until the clip finishes or `stop` is
/// cancelled; callers on an async runtime run it via `spawn_blocking`.
pub trait AudioSink: Send + Sync {
    /// Play `audio` to completion or until `stop` is cancelled
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if no output device is usable
    fn play(&self, audio: &SynthesizedAudio, stop: &CancellationToken) -> Result<()>;
}

/// Plays audio on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSink;

impl CpalSink {
    /// Create a sink for the default output device
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioSink for CpalSink {
    fn play(&self, audio: &SynthesizedAudio, stop: &CancellationToken) -> Result<()> {
        if audio.is_empty() || stop.is_cancelled() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let mono = downmix(audio);
        let (config, samples) = negotiate(&device, audio.sample_rate, mono)?;
        let channels = usize::from(config.channels);
        let rate = config.sample_rate.0;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = rate,
            channels,
            "audio playback initialized"
        );

        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position_cb.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples_cb.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples_cb.len() {
                            pos += 1;
                        }
                    }
                    position_cb.store(pos, Ordering::Relaxed);
                    if pos >= samples_cb.len() {
                        finished_cb.store(true, Ordering::Relaxed);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let nominal = Duration::from_millis((sample_count as u64 * 1000) / u64::from(rate.max(1)));
        let deadline = Instant::now() + nominal + DRAIN_GRACE;

        let mut interrupted = false;
        while !finished.load(Ordering::Relaxed) {
            if stop.is_cancelled() {
                interrupted = true;
                break;
            }
            if Instant::now() > deadline {
                tracing::warn!("playback did not drain before deadline");
                break;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        if !interrupted {
            // Let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(
            samples = sample_count,
            played = position.load(Ordering::Relaxed),
            interrupted,
            "playback complete"
        );

        Ok(())
    }
}

/// Average interleaved channels down to mono
fn downmix(audio: &SynthesizedAudio) -> Vec<f32> {
    let channels = usize::from(audio.channels.max(1));
    if channels == 1 {
        return audio.samples.clone();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    audio
        .samples
        .chunks(channels)
        .map(|c| c.iter().sum::<f32>() * scale)
        .collect()
}

/// Pick an output config, converting the clip if the device needs another rate
fn negotiate(
    device: &cpal::Device,
    clip_rate: u32,
    mono: Vec<f32>,
) -> Result<(StreamConfig, Vec<f32>)> {
    let wanted = SampleRate(clip_rate);
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .collect();

    let supports = |c: &&SupportedStreamConfigRange| {
        c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted
    };

    // Mono first, then stereo, at the clip's own rate
    let native = ranges
        .iter()
        .filter(supports)
        .find(|c| c.channels() == 1)
        .or_else(|| ranges.iter().filter(supports).find(|c| c.channels() == 2));

    if let Some(range) = native {
        return Ok((range.clone().with_sample_rate(wanted).config(), mono));
    }

    let fallback = ranges
        .iter()
        .filter(|c| c.channels() <= 2)
        .max_by_key(|c| c.max_sample_rate())
        .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;
    let config = fallback.clone().with_max_sample_rate().config();

    tracing::debug!(
        from = clip_rate,
        to = config.sample_rate.0,
        "converting clip to device rate"
    );
    let converted = convert_clip(&mono, clip_rate, config.sample_rate.0, 1)
        .map_err(|e| Error::Playback(e.to_string()))?;
    Ok((config, converted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let audio = SynthesizedAudio::new(vec![1.0, 0.0, 0.5, 0.5], 24000, 2);
        assert_eq!(downmix(&audio), vec![0.5, 0.5]);
    }

    #[test]
    fn test_cancelled_before_start_is_noop() {
        let token = CancellationToken::new();
        token.cancel();
        let audio = SynthesizedAudio::new(vec![0.1; 100], 24000, 1);
        assert!(CpalSink::new().play(&audio, &token).is_ok());
    }
}
