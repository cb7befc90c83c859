//! Wake word detection
//!
//! `WakeGate` turns a stream of classifier scores into a debounced trigger.
//! Classifiers are pluggable: a local energy-spike heuristic, or a hybrid
//! that gates speech segments by energy and verifies them through STT.

use std::sync::Arc;

use async_trait::async_trait;

use super::endpoint::samples_to_wav;
use super::frame::{AudioFormat, AudioFrame, rms};
use super::stt::{EncodedAudio, Transcriber};
use crate::{Error, Result};

/// Scores audio for presence of the trigger phrase
///
/// Buffering or resampling to the model's preferred window is the
/// classifier's own business.
#[async_trait]
pub trait TriggerClassifier: Send {
    /// Score one frame, in [0.0, 1.0]. Higher = more confident.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying model or backend fails
    async fn score(&mut self, frame: &AudioFrame) -> Result<f32>;

    /// Clear internal state so residual audio cannot re-trigger
    fn reset(&mut self);
}

/// Debounced trigger on top of a classifier
///
/// Fires once per rising edge above `sensitivity`, then resets the
/// classifier. It re-arms only after the score drops back to or below
/// `sensitivity`, so a sustained detection yields a single trigger.
pub struct WakeGate {
    classifier: Box<dyn TriggerClassifier>,
    sensitivity: f32,
    armed: bool,
}

impl WakeGate {
    /// Create a gate over `classifier`
    #[must_use]
    pub fn new(classifier: Box<dyn TriggerClassifier>, sensitivity: f32) -> Self {
        Self {
            classifier,
            sensitivity: sensitivity.clamp(0.0, 1.0),
            armed: true,
        }
    }

    /// Feed one frame; true exactly once per detection
    ///
    /// Classifier failures are logged and count as a zero score.
    pub async fn feed(&mut self, frame: &AudioFrame) -> bool {
        let score = match self.classifier.score(frame).await {
            Ok(s) if s.is_finite() => s.clamp(0.0, 1.0),
            Ok(s) => {
                tracing::warn!(score = s, "classifier returned non-finite score");
                0.0
            }
            Err(e) => {
                tracing::warn!(error = %e, "trigger classifier failed");
                0.0
            }
        };

        tracing::trace!(score, armed = self.armed, "wake score");

        if score > self.sensitivity {
            if self.armed {
                self.armed = false;
                self.classifier.reset();
                tracing::info!(score, sensitivity = self.sensitivity, "wake word detected");
                return true;
            }
            return false;
        }

        self.armed = true;
        false
    }

    /// Reset the classifier and re-arm
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.armed = true;
    }

    /// Configured threshold
    #[must_use]
    pub const fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Whether the next rising edge will fire
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Local heuristic: a sudden rise in energy over the moving average
pub struct EnergyTrigger {
    /// Smoothed energy tracking for pattern detection
    prev_energy: f64,
    /// Energy must exceed this multiple of the average to count
    spike_ratio: f64,
    /// Average energy below which spikes are ignored (PCM units)
    noise_floor: f64,
}

impl Default for EnergyTrigger {
    fn default() -> Self {
        Self::new(3.0, 100.0)
    }
}

impl EnergyTrigger {
    /// Create an energy trigger
    #[must_use]
    pub const fn new(spike_ratio: f64, noise_floor: f64) -> Self {
        Self {
            prev_energy: 0.0,
            spike_ratio,
            noise_floor,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn score_samples(&mut self, samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let energy = rms(samples);
        let score = if self.prev_energy > self.noise_floor
            && energy > self.prev_energy * self.spike_ratio
        {
            let ratio = energy / self.prev_energy;
            ((ratio - self.spike_ratio) / self.spike_ratio).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.prev_energy = self.prev_energy.mul_add(0.9, energy * 0.1);
        score as f32
    }
}

#[async_trait]
impl TriggerClassifier for EnergyTrigger {
    async fn score(&mut self, frame: &AudioFrame) -> Result<f32> {
        Ok(self.score_samples(frame.samples()))
    }

    fn reset(&mut self) {
        self.prev_energy = 0.0;
    }
}

/// State of the phrase detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Timing for energy-gated speech segments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    /// Mean amplitude at or above which a frame counts as speech
    pub energy_threshold: u16,
    /// Minimum segment length worth transcribing, in seconds
    pub min_speech: f64,
    /// Silence that closes a segment, in seconds
    pub silence: f64,
    /// Segments longer than this are abandoned, in seconds
    pub max_segment: f64,
}

impl Default for SegmentTiming {
    fn default() -> Self {
        Self {
            energy_threshold: 500,
            min_speech: 0.3,
            silence: 0.5,
            max_segment: 5.0,
        }
    }
}

/// Hybrid detector: energy-gated segments verified through STT
///
/// Scores 1.0 when a completed segment's transcript contains one of the
/// configured phrases, otherwise 0.0.
pub struct PhraseTrigger {
    phrases: Vec<String>,
    transcriber: Arc<dyn Transcriber>,
    timing: SegmentTiming,
    state: DetectorState,
    segment: Vec<AudioFrame>,
    segment_samples: usize,
    silence_samples: usize,
}

impl PhraseTrigger {
    /// Create a phrase trigger
    ///
    /// # Arguments
    ///
    /// * `phrases` - Wake phrases to detect (e.g., "atlas", "hey atlas")
    #[must_use]
    pub fn new(
        phrases: Vec<String>,
        transcriber: Arc<dyn Transcriber>,
        timing: SegmentTiming,
    ) -> Self {
        let normalized: Vec<String> = phrases
            .into_iter()
            .map(|w| w.to_lowercase().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        tracing::debug!(phrases = ?normalized, "phrase trigger initialized");

        Self {
            phrases: normalized,
            transcriber,
            timing,
            state: DetectorState::Idle,
            segment: Vec::new(),
            segment_samples: 0,
            silence_samples: 0,
        }
    }

    /// Check if transcribed text contains a wake phrase
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        let normalized = transcript.to_lowercase();
        self.phrases.iter().any(|p| normalized.contains(p.as_str()))
    }

    /// Get the configured phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn samples_for(frame: &AudioFrame, secs: f64) -> usize {
        (secs * f64::from(frame.sample_rate()) * f64::from(frame.channels())) as usize
    }

    async fn verify_segment(&mut self) -> Result<f32> {
        let frames = std::mem::take(&mut self.segment);
        self.clear();

        let Some(first) = frames.first() else {
            return Ok(0.0);
        };
        let format = AudioFormat::new(
            first.sample_rate(),
            first.channels(),
            first.len() / usize::from(first.channels()),
        );
        let samples: Vec<i16> = frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect();

        tracing::debug!(samples = samples.len(), "checking segment for wake phrase");

        let wav = samples_to_wav(&samples, format.sample_rate, format.channels)?;
        let transcript = self
            .transcriber
            .transcribe(&EncodedAudio::wav(wav, format))
            .await
            .map_err(|e| Error::WakeWord(format!("phrase check failed: {e}")))?;

        if self.matches(&transcript) {
            tracing::info!(transcript = %transcript, "wake phrase heard");
            Ok(1.0)
        } else {
            tracing::debug!(transcript = %transcript, "no wake phrase in segment");
            Ok(0.0)
        }
    }

    fn clear(&mut self) {
        self.state = DetectorState::Idle;
        self.segment.clear();
        self.segment_samples = 0;
        self.silence_samples = 0;
    }
}

#[async_trait]
impl TriggerClassifier for PhraseTrigger {
    async fn score(&mut self, frame: &AudioFrame) -> Result<f32> {
        let is_speech = frame.mean_amplitude() >= f64::from(self.timing.energy_threshold);

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.segment.clear();
                    self.segment.push(frame.clone());
                    self.segment_samples = frame.len();
                    self.silence_samples = 0;
                    tracing::trace!("speech detected, listening");
                }
                Ok(0.0)
            }
            DetectorState::Listening => {
                self.segment.push(frame.clone());
                self.segment_samples += frame.len();

                if is_speech {
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame.len();
                }

                let silence_limit = Self::samples_for(frame, self.timing.silence);
                let voiced = self.segment_samples - self.silence_samples;

                if self.silence_samples > silence_limit
                    && voiced > Self::samples_for(frame, self.timing.min_speech)
                {
                    return self.verify_segment().await;
                }

                if self.silence_samples > silence_limit * 2
                    || self.segment_samples > Self::samples_for(frame, self.timing.max_segment)
                {
                    tracing::trace!("segment abandoned");
                    self.clear();
                }

                Ok(0.0)
            }
        }
    }

    fn reset(&mut self) {
        self.clear();
    }
}
