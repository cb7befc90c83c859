//! Configuration management for the Atlas voice loop
//!
//! Precedence: environment > TOML file > built-in defaults.

pub mod file;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::agent::DEFAULT_SYSTEM_PROMPT;
use crate::turn::Phrases;
use crate::voice::{AudioFormat, EndpointConfig, FRAME_SIZE, SAMPLE_RATE};
use crate::{Error, Result};

pub use file::{AtlasConfigFile, config_file_path, load_config_file};

/// Atlas configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Capture format and endpointing
    pub audio: AudioConfig,

    /// Wake word detection
    pub wake: WakeConfig,

    /// Speech recognition
    pub stt: SttConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Chat model
    pub llm: LlmConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Spoken phrases
    pub phrases: Phrases,
}

/// Capture format and endpointing thresholds
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub format: AudioFormat,
    pub endpoint: EndpointConfig,
    /// Minimum voiced audio worth transcribing
    pub min_speech: Duration,
}

/// Wake word backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeBackend {
    /// Energy-gated segments verified by transcription
    Phrase,
    /// Local energy-spike heuristic
    Energy,
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Detection threshold in [0, 1]
    pub sensitivity: f32,
    pub backend: WakeBackend,
    /// Phrases the phrase backend listens for
    pub phrases: Vec<String>,
}

/// STT provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
}

/// TTS provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAi,
    Espeak,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
}

/// Chat model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub system_prompt: String,
    /// Exchanges kept in conversation history
    pub max_history: usize,
    /// Override for `OpenAI`-compatible endpoints
    pub base_url: Option<String>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

macro_rules! impl_choice {
    ($ty:ident, $what:literal, { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(Error::Config(format!(
                        concat!("unknown ", $what, " '{}' (expected ", $($name, " "),+, ")"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $(Self::$variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

impl_choice!(WakeBackend, "wake backend", { "phrase" => Phrase, "energy" => Energy });
impl_choice!(SttProvider, "STT provider", { "whisper" => Whisper, "deepgram" => Deepgram });
impl_choice!(TtsProvider, "TTS provider", { "openai" => OpenAi, "espeak" => Espeak });

impl SttProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

/// Read a variable, treating empty values as unset
fn lookup(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.trim().is_empty())
}

/// Parse a variable, falling back to the file value, then `default`
fn parse_or<T>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    file: Option<T>,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(env, name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name} '{raw}': {e}"))),
        None => Ok(file.unwrap_or(default)),
    }
}

/// Seconds as a `Duration`, rejecting values `Duration` cannot hold
fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("invalid {name} '{secs}': {e}")))
}

impl Config {
    /// Load configuration from `.env`-populated environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unreadable explicit files or malformed values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = load_config_file(path)?;
        Self::from_sources(file, |name| std::env::var(name).ok())
    }

    /// Merge an environment lookup over a parsed config file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first malformed variable
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(
        fc: AtlasConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let format = AudioFormat::new(
            parse_or(&env, "ATLAS_SAMPLE_RATE", fc.audio.sample_rate, SAMPLE_RATE)?,
            parse_or(&env, "ATLAS_CHANNELS", fc.audio.channels, 1)?,
            parse_or(&env, "ATLAS_FRAME_SIZE", fc.audio.frame_size, FRAME_SIZE)?,
        );

        let defaults = EndpointConfig::default();
        let endpoint = EndpointConfig {
            silence_threshold: parse_or(
                &env,
                "SILENCE_THRESHOLD",
                fc.audio.silence_threshold,
                defaults.silence_threshold,
            )?,
            silence_duration: parse_or(
                &env,
                "SILENCE_DURATION",
                fc.audio.silence_duration,
                defaults.silence_duration,
            )?,
            max_duration: parse_or(
                &env,
                "MAX_RECORDING_DURATION",
                fc.audio.max_recording_duration,
                defaults.max_duration,
            )?,
        };
        let min_speech = parse_or(&env, "ATLAS_MIN_SPEECH", fc.audio.min_speech, 0.1)?;

        let audio = AudioConfig {
            format,
            endpoint,
            min_speech: seconds("ATLAS_MIN_SPEECH", min_speech)?,
        };

        let wake_backend = match lookup(&env, "ATLAS_WAKE_BACKEND").or(fc.wake.backend) {
            Some(raw) => raw.parse()?,
            None => WakeBackend::Phrase,
        };
        let wake_phrases = lookup(&env, "ATLAS_WAKE_PHRASES")
            .map(|raw| raw.split(',').map(str::to_string).collect::<Vec<_>>())
            .or(fc.wake.phrases)
            .unwrap_or_else(|| vec!["atlas".to_string()])
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let wake = WakeConfig {
            sensitivity: parse_or(&env, "WAKE_WORD_SENSITIVITY", fc.wake.sensitivity, 0.5)?,
            backend: wake_backend,
            phrases: wake_phrases,
        };

        let stt_provider = match lookup(&env, "ATLAS_STT_PROVIDER").or(fc.stt.provider) {
            Some(raw) => raw.parse()?,
            None => SttProvider::Whisper,
        };
        let stt = SttConfig {
            provider: stt_provider,
            model: lookup(&env, "ATLAS_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
        };

        let tts_provider = match lookup(&env, "ATLAS_TTS_PROVIDER").or(fc.tts.provider) {
            Some(raw) => raw.parse()?,
            None => TtsProvider::OpenAi,
        };
        let tts = TtsConfig {
            provider: tts_provider,
            model: lookup(&env, "ATLAS_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: lookup(&env, "ATLAS_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::OpenAi => "alloy".to_string(),
                    TtsProvider::Espeak => "en".to_string(),
                }),
            speed: parse_or(&env, "ATLAS_TTS_SPEED", fc.tts.speed, 1.0)?,
        };

        let llm = LlmConfig {
            model: lookup(&env, "GPT_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: lookup(&env, "SYSTEM_PROMPT")
                .or(fc.llm.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_history: parse_or(&env, "ATLAS_MAX_HISTORY", fc.llm.max_history, 10)?,
            base_url: lookup(&env, "ATLAS_OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .map(|u| u.trim_end_matches('/').to_string()),
        };

        let api_keys = ApiKeys {
            openai: lookup(&env, "OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            deepgram: lookup(&env, "DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
        };

        let mut phrases = Phrases::default();
        if let Some(p) = fc.phrases.ready {
            phrases.ready = p;
        }
        if let Some(p) = fc.phrases.acknowledge {
            phrases.acknowledge = p;
        }
        if let Some(p) = fc.phrases.not_caught {
            phrases.not_caught = p;
        }
        if let Some(p) = fc.phrases.apology {
            phrases.apology = p;
        }

        Ok(Self {
            audio,
            wake,
            stt,
            tts,
            llm,
            api_keys,
            phrases,
        })
    }

    /// Check the configuration before any device is opened
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` listing every problem found
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        // Chat always goes through OpenAI
        if self.api_keys.openai.is_none() {
            problems.push("OPENAI_API_KEY is not set".to_string());
        }
        if self.stt.provider == SttProvider::Deepgram && self.api_keys.deepgram.is_none() {
            problems.push("DEEPGRAM_API_KEY is required for the deepgram STT provider".to_string());
        }

        if !(0.0..=1.0).contains(&self.wake.sensitivity) {
            problems.push(format!(
                "wake sensitivity must be within [0, 1], got {}",
                self.wake.sensitivity
            ));
        }
        if self.wake.backend == WakeBackend::Phrase && self.wake.phrases.is_empty() {
            problems.push("phrase wake backend needs at least one wake phrase".to_string());
        }

        let format = &self.audio.format;
        if format.sample_rate == 0 {
            problems.push("sample rate must be positive".to_string());
        }
        if format.channels == 0 {
            problems.push("channel count must be positive".to_string());
        }
        if format.frame_size == 0 {
            problems.push("frame size must be positive".to_string());
        }

        let endpoint = &self.audio.endpoint;
        if endpoint.silence_duration.is_nan() || endpoint.silence_duration <= 0.0 {
            problems.push("silence duration must be positive".to_string());
        }
        if endpoint.max_duration.is_nan() || endpoint.max_duration <= 0.0 {
            problems.push("max recording duration must be positive".to_string());
        }

        if self.llm.max_history == 0 {
            problems.push("max history must be at least one exchange".to_string());
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            problems.push(format!(
                "TTS speed must be within [0.25, 4.0], got {}",
                self.tts.speed
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = |k: &Option<SecretString>| if k.is_some() { "set" } else { "missing" };
        let format = &self.audio.format;
        let endpoint = &self.audio.endpoint;

        writeln!(f, "audio:")?;
        writeln!(
            f,
            "  format:            {} Hz, {} ch, {} samples/frame",
            format.sample_rate, format.channels, format.frame_size
        )?;
        writeln!(f, "  silence threshold: {}", endpoint.silence_threshold)?;
        writeln!(f, "  silence duration:  {}s", endpoint.silence_duration)?;
        writeln!(f, "  max recording:     {}s", endpoint.max_duration)?;
        writeln!(f, "  min speech:        {:?}", self.audio.min_speech)?;
        writeln!(f, "wake:")?;
        writeln!(f, "  backend:           {}", self.wake.backend)?;
        writeln!(f, "  sensitivity:       {}", self.wake.sensitivity)?;
        writeln!(f, "  phrases:           {}", self.wake.phrases.join(", "))?;
        writeln!(f, "stt:                 {} ({})", self.stt.provider, self.stt.model)?;
        writeln!(
            f,
            "tts:                 {} ({}, voice {}, speed {})",
            self.tts.provider, self.tts.model, self.tts.voice, self.tts.speed
        )?;
        writeln!(f, "llm:")?;
        writeln!(f, "  model:             {}", self.llm.model)?;
        writeln!(f, "  max history:       {}", self.llm.max_history)?;
        if let Some(url) = &self.llm.base_url {
            writeln!(f, "  base url:          {url}")?;
        }
        writeln!(f, "api keys:")?;
        writeln!(f, "  openai:            {}", key(&self.api_keys.openai))?;
        write!(f, "  deepgram:          {}", key(&self.api_keys.deepgram))
    }
}
