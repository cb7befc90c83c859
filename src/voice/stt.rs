//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::frame::AudioFormat;
use crate::{Error, Result};

/// Default `OpenAI` API base
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Encoded utterance audio plus its format descriptor
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    /// Container bytes
    pub data: Vec<u8>,
    /// PCM format inside the container
    pub format: AudioFormat,
    /// MIME type of `data`
    pub mime: &'static str,
    /// File name hint for multipart uploads
    pub file_name: &'static str,
}

impl EncodedAudio {
    /// Wrap 16-bit PCM WAV bytes
    #[must_use]
    pub const fn wav(data: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            data,
            format,
            mime: "audio/wav",
            file_name: "audio.wav",
        }
    }
}

/// Turns captured speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Transcription` if the backend call fails
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes through `OpenAI` Whisper
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String, api_base: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            api_base: api_base.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            model,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String> {
        tracing::debug!(audio_bytes = audio.data.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.data.clone())
                    .file_name(audio.file_name)
                    .mime_str(audio.mime)
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Transcription(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Transcription(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Transcription(e.to_string())
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

/// Transcribes through Deepgram
pub struct DeepgramTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl DeepgramTranscriber {
    /// Create a Deepgram transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String> {
        tracing::debug!(audio_bytes = audio.data.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", audio.mime)
            .body(audio.data.clone())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                Error::Transcription(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Transcription(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            Error::Transcription(e.to_string())
        })?;

        let transcript = first_transcript(result);

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

/// Pick the top alternative of the first channel
fn first_transcript(response: DeepgramResponse) -> String {
    response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default()
}
