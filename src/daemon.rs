//! Main daemon: wires configured backends into the voice loop

use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::agent::{ChatOptions, DialogueBackend, OpenAiChat};
use crate::config::{Config, SttProvider, TtsProvider, WakeBackend};
use crate::turn::{SessionSummary, TurnController, TurnOptions};
use crate::voice::{
    CpalSink, CpalSource, DeepgramTranscriber, EnergyTrigger, EspeakSynthesizer, OpenAiSpeech,
    PhraseTrigger, SegmentTiming, SpeechOutput, Synthesizer, Transcriber, TriggerClassifier,
    WakeGate, WhisperTranscriber,
};
use crate::{Error, Result};

/// espeak speaking rate, in words per minute
pub const ESPEAK_WORDS_PER_MINUTE: u32 = 175;

/// The Atlas voice daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from validated configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is incomplete
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run the voice loop until Ctrl-C or SIGTERM
    ///
    /// Every backend is constructed before the input device is opened.
    ///
    /// # Errors
    ///
    /// Returns error if a backend cannot be built or no input device exists
    pub async fn run(self) -> Result<SessionSummary> {
        let transcriber = self.transcriber()?;
        let dialogue = self.dialogue()?;
        let speech = self.speech_output()?;
        let wake = self.wake_gate(Arc::clone(&transcriber));

        let source = CpalSource::open(self.config.audio.format)?;

        let options = TurnOptions {
            endpoint: self.config.audio.endpoint,
            min_speech: self.config.audio.min_speech,
            max_history: self.config.llm.max_history,
            phrases: self.config.phrases.clone(),
        };
        let mut controller = TurnController::new(
            Box::new(source),
            wake,
            transcriber,
            dialogue,
            speech,
            options,
        );

        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()));

        match self.config.wake.backend {
            WakeBackend::Phrase => tracing::info!(
                "atlas ready - say \"{}\"",
                self.config.wake.phrases.join("\" or \"")
            ),
            WakeBackend::Energy => tracing::info!("atlas ready - speak up to wake"),
        }

        controller.run(shutdown).await
    }

    /// Build the configured transcriber
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the provider's key is missing
    pub fn transcriber(&self) -> Result<Arc<dyn Transcriber>> {
        let stt = &self.config.stt;
        let transcriber: Arc<dyn Transcriber> = match stt.provider {
            SttProvider::Whisper => Arc::new(WhisperTranscriber::new(
                self.openai_key()?,
                stt.model.clone(),
                self.config.llm.base_url.clone(),
            )?),
            SttProvider::Deepgram => Arc::new(DeepgramTranscriber::new(
                required_key(self.config.api_keys.deepgram.as_ref(), "DEEPGRAM_API_KEY")?,
                stt.model.clone(),
            )?),
        };
        tracing::debug!(backend = transcriber.name(), model = %stt.model, "transcriber ready");
        Ok(transcriber)
    }

    /// Build the configured synthesizer
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key or local binary is missing
    pub fn synthesizer(&self) -> Result<Arc<dyn Synthesizer>> {
        let tts = &self.config.tts;
        let synthesizer: Arc<dyn Synthesizer> = match tts.provider {
            TtsProvider::OpenAi => Arc::new(OpenAiSpeech::new(
                self.openai_key()?,
                tts.model.clone(),
                tts.voice.clone(),
                tts.speed,
                self.config.llm.base_url.clone(),
            )?),
            TtsProvider::Espeak => Arc::new(EspeakSynthesizer::new(
                tts.voice.clone(),
                ESPEAK_WORDS_PER_MINUTE,
            )?),
        };
        tracing::debug!(backend = synthesizer.name(), "synthesizer ready");
        Ok(synthesizer)
    }

    /// Synthesizer plus the default output device
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot be built
    pub fn speech_output(&self) -> Result<SpeechOutput> {
        Ok(SpeechOutput::new(self.synthesizer()?, Arc::new(CpalSink::new())))
    }

    /// Build the chat backend
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the `OpenAI` key is missing
    pub fn dialogue(&self) -> Result<Arc<dyn DialogueBackend>> {
        let llm = &self.config.llm;
        let options = ChatOptions {
            model: llm.model.clone(),
            system_prompt: llm.system_prompt.clone(),
            ..ChatOptions::default()
        };
        Ok(Arc::new(OpenAiChat::new(
            self.openai_key()?,
            options,
            llm.base_url.clone(),
        )?))
    }

    /// Build the wake gate over the configured classifier
    #[must_use]
    pub fn wake_gate(&self, transcriber: Arc<dyn Transcriber>) -> WakeGate {
        let wake = &self.config.wake;
        let classifier: Box<dyn TriggerClassifier> = match wake.backend {
            WakeBackend::Phrase => Box::new(PhraseTrigger::new(
                wake.phrases.clone(),
                transcriber,
                SegmentTiming {
                    energy_threshold: self.config.audio.endpoint.silence_threshold,
                    ..SegmentTiming::default()
                },
            )),
            WakeBackend::Energy => Box::new(EnergyTrigger::default()),
        };
        tracing::debug!(backend = %wake.backend, sensitivity = wake.sensitivity, "wake gate ready");
        WakeGate::new(classifier, wake.sensitivity)
    }

    fn openai_key(&self) -> Result<SecretString> {
        required_key(self.config.api_keys.openai.as_ref(), "OPENAI_API_KEY")
    }
}

fn required_key(key: Option<&SecretString>, name: &str) -> Result<SecretString> {
    key.cloned()
        .ok_or_else(|| Error::Config(format!("{name} is not set")))
}

/// Cancel `token` on Ctrl-C or SIGTERM
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
        () = token.cancelled() => return,
    }

    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtlasConfigFile;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(AtlasConfigFile::default(), move |name| {
            pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_missing_key_fails_before_audio() {
        assert!(matches!(Daemon::new(config(&[])), Err(Error::Config(_))));
    }

    #[test]
    fn test_builds_openai_backends() {
        let daemon = Daemon::new(config(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(daemon.transcriber().unwrap().name(), "whisper");
        assert!(daemon.dialogue().is_ok());
        assert_eq!(daemon.synthesizer().unwrap().name(), "openai");
    }

    #[test]
    fn test_deepgram_selected() {
        let daemon = Daemon::new(config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DEEPGRAM_API_KEY", "dg-test"),
            ("ATLAS_STT_PROVIDER", "deepgram"),
        ]))
        .unwrap();
        assert_eq!(daemon.transcriber().unwrap().name(), "deepgram");
    }
}
