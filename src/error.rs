//! Error types for the Atlas voice loop

use thiserror::Error;

/// Result type alias for Atlas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (fatal, reported before audio is opened)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio hardware unavailable or format unsupported
    #[error("audio device error: {0}")]
    Device(String),

    /// Input stream dropped out while reading
    #[error("audio stream error: {0}")]
    Stream(String),

    /// Speech-to-text backend failed
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Dialogue backend failed
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// Speech synthesis backend could not produce audio
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// No output sink available or playback failed
    #[error("playback error: {0}")]
    Playback(String),

    /// Sample rate conversion failure
    #[error("resample error: {0}")]
    Resample(String),

    /// Trigger classifier failure
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether this error only ends the current turn
    ///
    /// Configuration problems are fatal; everything else is downgraded to a
    /// logged message and a spoken notice by the turn controller.
    #[must_use]
    pub const fn is_turn_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Whether the input device must be reopened before the next turn
    #[must_use]
    pub const fn needs_reopen(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Device(_))
    }
}
