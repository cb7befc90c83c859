//! TOML configuration file loading
//!
//! Supports `~/.config/atlas/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtlasConfigFile {
    /// Audio device and endpointing
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake word detection
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Chat model
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Spoken phrases
    #[serde(default)]
    pub phrases: PhrasesFileConfig,
}

/// Capture format and endpointing thresholds
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub frame_size: Option<usize>,
    /// Mean amplitude below which a frame is silent
    pub silence_threshold: Option<u16>,
    /// Seconds of silence that end an utterance
    pub silence_duration: Option<f64>,
    /// Hard cap on one utterance, in seconds
    pub max_recording_duration: Option<f64>,
    /// Minimum voiced audio worth transcribing, in seconds
    pub min_speech: Option<f64>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Detection threshold in [0, 1]
    pub sensitivity: Option<f32>,
    /// "phrase" or "energy"
    pub backend: Option<String>,
    /// Phrases the phrase backend listens for
    pub phrases: Option<Vec<String>>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    /// e.g. "whisper-1", "nova-2"
    pub model: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "espeak"
    pub provider: Option<String>,
    /// e.g. "tts-1"
    pub model: Option<String>,
    /// e.g. "alloy"
    pub voice: Option<String>,
    /// Speed multiplier
    pub speed: Option<f32>,
}

/// Chat model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Exchanges kept in conversation history
    pub max_history: Option<usize>,
    /// Override for `OpenAI`-compatible endpoints
    pub base_url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Spoken phrase overrides
#[derive(Debug, Default, Deserialize)]
pub struct PhrasesFileConfig {
    pub ready: Option<String>,
    pub acknowledge: Option<String>,
    pub not_caught: Option<String>,
    pub apology: Option<String>,
}

/// Load the TOML config file
///
/// With an explicit `path`, a missing or malformed file is an error. The
/// default path is optional and only warned about.
///
/// # Errors
///
/// Returns `Error::Config` if an explicitly requested file cannot be used
pub fn load_config_file(path: Option<&Path>) -> Result<AtlasConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(AtlasConfigFile::default());
    };

    if !path.exists() {
        return Ok(AtlasConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(AtlasConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(AtlasConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/atlas/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("atlas").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file() {
        let config: AtlasConfigFile = toml::from_str(
            r#"
            [audio]
            silence_threshold = 800

            [wake]
            phrases = ["hey atlas", "atlas"]
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.silence_threshold, Some(800));
        assert_eq!(config.audio.sample_rate, None);
        assert_eq!(config.wake.phrases.unwrap().len(), 2);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config_file(Some(&missing)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nmodel = \"gpt-4o\"\n").unwrap();
        let config = load_config_file(Some(&path)).unwrap();
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(toml::from_str::<AtlasConfigFile>("[channels]\nx = 1\n").is_err());
    }
}
