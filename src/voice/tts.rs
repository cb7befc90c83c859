//! Text-to-speech (TTS) processing

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::frame::i16_to_f32;
use super::stt::OPENAI_API_BASE;
use crate::{Error, Result};

/// Synthesized PCM ready for a sink
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Samples per second, per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl SynthesizedAudio {
    /// Wrap samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let per_channel = self.samples.len() / usize::from(self.channels);
        Duration::from_secs_f64(per_channel as f64 / f64::from(self.sample_rate))
    }
}

/// Turns reply text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the backend cannot produce audio
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Synthesizes through `OpenAI` TTS
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiSpeech {
    /// Create an `OpenAI` synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: SecretString,
        model: String,
        voice: String,
        speed: f32,
        api_base: Option<String>,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            api_base: api_base.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            voice,
            speed,
            model,
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "requesting OpenAI speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        decode_mp3(&audio)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Synthesizes locally with the `espeak-ng` binary
pub struct EspeakSynthesizer {
    binary: PathBuf,
    voice: String,
    words_per_minute: u32,
}

impl EspeakSynthesizer {
    /// Locate `espeak-ng` (or `espeak`) on `PATH`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if neither binary is installed
    pub fn new(voice: String, words_per_minute: u32) -> Result<Self> {
        let binary = which::which("espeak-ng")
            .or_else(|_| which::which("espeak"))
            .map_err(|_| Error::Config("espeak-ng not found on PATH".to_string()))?;

        tracing::debug!(binary = %binary.display(), "using espeak");

        Ok(Self {
            binary,
            voice,
            words_per_minute,
        })
    }
}

#[async_trait]
impl Synthesizer for EspeakSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("--stdout")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to run espeak: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "espeak exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        decode_wav(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "espeak"
    }
}

/// Decode MP3 bytes to mono f32 samples at the stream's rate
///
/// # Errors
///
/// Returns `Error::Synthesis` if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<SynthesizedAudio> {
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
                        let left = i16_to_f32(chunk[0]);
                        let right = i16_to_f32(chunk.get(1).copied().unwrap_or(chunk[0]));
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| i16_to_f32(s)));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Synthesis(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Synthesis("no audio frames in MP3 data".to_string()));
    }

    Ok(SynthesizedAudio::new(samples, sample_rate, 1))
}

/// Decode 16-bit or float WAV bytes to f32 samples
///
/// # Errors
///
/// Returns `Error::Synthesis` if the data is not a readable WAV stream
pub fn decode_wav(wav_data: &[u8]) -> Result<SynthesizedAudio> {
    let wav_error = |e: hound::Error| Error::Synthesis(format!("WAV decode error: {e}"));

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).map_err(wav_error)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(i16_to_f32))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(wav_error)?,
    };

    Ok(SynthesizedAudio::new(samples, spec.sample_rate, spec.channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::endpoint::samples_to_wav;

    #[test]
    fn test_decode_wav() {
        let wav = samples_to_wav(&[0, 16384, -16384, 0], 22050, 1).unwrap();
        let audio = decode_wav(&wav).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.samples.len(), 4);
        assert!((audio.samples[1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_wav_errors_are_synthesis_errors() {
        assert!(matches!(decode_wav(b"not audio"), Err(Error::Synthesis(_))));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(1_000_000i32).unwrap();
            writer.finalize().unwrap();
        }
        assert!(matches!(
            decode_wav(&cursor.into_inner()),
            Err(Error::Synthesis(_))
        ));
    }

    #[test]
    fn test_decode_garbage_mp3() {
        assert!(decode_mp3(b"not audio").is_err());
    }

    #[test]
    fn test_duration() {
        let audio = SynthesizedAudio::new(vec![0.0; 48000], 24000, 2);
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_key() {
        let result = OpenAiSpeech::new(
            SecretString::from(String::new()),
            "tts-1".into(),
            "alloy".into(),
            1.0,
            None,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
