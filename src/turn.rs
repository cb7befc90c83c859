//! Turn-taking state machine
//!
//! Listening → Acknowledging → Capturing → Transcribing → Dispatching →
//! Speaking → Idle, with any failure routed through Error back to
//! Listening. One task owns the controller and is the sole reader of the
//! audio source; exactly one state is active at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{ConversationHistory, DialogueBackend};
use crate::voice::{
    AudioSource, EncodedAudio, EndpointConfig, EndpointStatus, Endpointer, SpeechOutput,
    Transcriber, WakeGate,
};
use crate::{Error, Result};

/// Wait before the next cycle when the input device cannot be reopened
pub const RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// Buffered transitions per subscriber before it starts lagging
const TRANSITION_CAPACITY: usize = 256;

/// Phase of the voice loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Listening,
    Acknowledging,
    Capturing,
    Transcribing,
    Dispatching,
    Speaking,
    Error,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Acknowledging => "acknowledging",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Dispatching => "dispatching",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

impl PipelineState {
    /// Whether moving from `self` to `next` is a legal step
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Error, Self::Listening)
                | (Self::Listening, Self::Acknowledging)
                | (Self::Acknowledging, Self::Capturing)
                | (Self::Capturing, Self::Transcribing)
                // nothing voiced, or nothing transcribed
                | (Self::Capturing | Self::Transcribing, Self::Listening)
                | (Self::Transcribing, Self::Dispatching)
                | (Self::Dispatching, Self::Speaking)
                | (Self::Speaking, Self::Idle | Self::Listening)
                // failure from anywhere, shutdown from anywhere
                | (_, Self::Error | Self::Idle)
        )
    }
}

/// A state change, as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// What the controller says aloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrases {
    /// Spoken once when the loop starts
    pub ready: String,
    /// Spoken on trigger
    pub acknowledge: String,
    /// Spoken when nothing usable was heard
    pub not_caught: String,
    /// Spoken when a turn fails
    pub apology: String,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            ready: "Atlas is ready.".to_string(),
            acknowledge: "Yes?".to_string(),
            not_caught: "I didn't catch that.".to_string(),
            apology: "Sorry, I encountered an error.".to_string(),
        }
    }
}

/// Tunables for the controller
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub endpoint: EndpointConfig,
    /// Captures with less voiced audio than this skip transcription
    pub min_speech: Duration,
    /// Exchanges kept in the conversation history
    pub max_history: usize,
    pub phrases: Phrases,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            min_speech: Duration::from_millis(100),
            max_history: 10,
            phrases: Phrases::default(),
        }
    }
}

/// Counters for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Wake triggers observed
    pub triggers: u64,
    /// Turns that ended with a spoken reply
    pub completed: u64,
    /// Turns where nothing usable was heard
    pub empty: u64,
    /// Turns aborted by an error
    pub failed: u64,
}

/// How a single turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    Empty,
}

/// Drives the voice loop
pub struct TurnController {
    source: Box<dyn AudioSource>,
    wake: WakeGate,
    endpointer: Endpointer,
    transcriber: Arc<dyn Transcriber>,
    dialogue: Arc<dyn DialogueBackend>,
    speech: SpeechOutput,
    history: ConversationHistory,
    options: TurnOptions,
    state: PipelineState,
    summary: SessionSummary,
    transitions: broadcast::Sender<Transition>,
}

impl TurnController {
    /// Assemble a controller; the endpointer follows the source's format
    #[must_use]
    pub fn new(
        source: Box<dyn AudioSource>,
        wake: WakeGate,
        transcriber: Arc<dyn Transcriber>,
        dialogue: Arc<dyn DialogueBackend>,
        speech: SpeechOutput,
        options: TurnOptions,
    ) -> Self {
        let endpointer = Endpointer::new(options.endpoint, source.format());
        let history = ConversationHistory::new(options.max_history);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            source,
            wake,
            endpointer,
            transcriber,
            dialogue,
            speech,
            history,
            options,
            state: PipelineState::Idle,
            summary: SessionSummary::default(),
            transitions,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Conversation so far
    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Receive every state transition from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Run until `shutdown` is cancelled
    ///
    /// Per-turn failures are logged, apologized for, and never end the
    /// loop. On shutdown, playback is stopped and the input device
    /// released before returning.
    ///
    /// # Errors
    ///
    /// Returns error only for failures that are not recoverable per turn
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<SessionSummary> {
        self.summary = SessionSummary::default();
        tracing::info!(
            sensitivity = self.wake.sensitivity(),
            max_history = self.history.max_pairs(),
            "voice loop starting"
        );

        let ready = self.options.phrases.ready.clone();
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {}
            result = self.speech.speak(&ready) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to speak ready greeting");
                }
            }
        }

        let mut fatal = None;
        while !shutdown.is_cancelled() {
            let step = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                step = self.step() => step,
            };

            match step {
                Step::Idle => {}
                Step::Turn(outcome) => {
                    match outcome {
                        Ok(TurnOutcome::Completed) => self.summary.completed += 1,
                        Ok(TurnOutcome::Empty) => self.summary.empty += 1,
                        Err(e) => {
                            self.summary.failed += 1;
                            if !e.is_turn_recoverable() {
                                fatal = Some(e);
                                break;
                            }
                        }
                    }
                }
                Step::Fatal(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }

        self.shutdown().await;
        let summary = self.summary;
        tracing::info!(
            triggers = summary.triggers,
            completed = summary.completed,
            empty = summary.empty,
            failed = summary.failed,
            "voice loop stopped"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Wait for a trigger, then run one turn
    async fn step(&mut self) -> Step {
        if self.state != PipelineState::Listening {
            self.transition(PipelineState::Listening);
        }

        if let Err(e) = self.listen().await {
            if !e.is_turn_recoverable() {
                return Step::Fatal(e);
            }
            self.transition(PipelineState::Error);
            tracing::warn!(error = %e, "listening interrupted");
            self.recover(&e).await;
            self.transition(PipelineState::Listening);
            return Step::Idle;
        }

        self.summary.triggers += 1;
        let span = tracing::info_span!("turn", id = %uuid::Uuid::new_v4());
        let outcome = self.turn().instrument(span.clone()).await;

        if let Err(e) = &outcome {
            self.fail(e).instrument(span).await;
        }

        Step::Turn(outcome)
    }

    /// Feed frames to the wake gate until it fires
    async fn listen(&mut self) -> Result<()> {
        self.source.flush();
        self.wake.reset();

        loop {
            let frame = self.source.read_frame().await?;
            if self.wake.feed(&frame).await {
                return Ok(());
            }
        }
    }

    async fn turn(&mut self) -> Result<TurnOutcome> {
        self.transition(PipelineState::Acknowledging);
        let acknowledge = self.options.phrases.acknowledge.clone();
        if let Err(e) = self.speech.speak(&acknowledge).await {
            tracing::warn!(error = %e, "acknowledgment failed");
        }

        self.transition(PipelineState::Capturing);
        self.source.flush();
        self.endpointer.start();

        let status = loop {
            let frame = self.source.read_frame().await?;
            match self.endpointer.feed(frame) {
                EndpointStatus::Continue => {}
                done => break done,
            }
        };
        let utterance = self.endpointer.finish();

        tracing::info!(
            ?status,
            frames = utterance.len(),
            voiced = utterance.voiced_frames(),
            duration_ms = utterance.duration().as_millis(),
            "utterance captured"
        );

        if utterance.is_effectively_silent(self.options.min_speech) {
            tracing::info!("no speech captured");
            return Ok(self.not_caught().await);
        }

        self.transition(PipelineState::Transcribing);
        let audio = EncodedAudio::wav(utterance.to_wav()?, utterance.format());
        let text = self.transcriber.transcribe(&audio).await?;
        let text = text.trim();

        if text.is_empty() {
            tracing::info!(backend = self.transcriber.name(), "empty transcript");
            return Ok(self.not_caught().await);
        }
        tracing::info!(transcript = %text, "user said");

        self.transition(PipelineState::Dispatching);
        let reply = self.dialogue.reply(&self.history, text).await?;
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(Error::Dialogue("empty reply".to_string()));
        }
        self.history.record_exchange(text, reply.clone());

        self.transition(PipelineState::Speaking);
        self.speech.speak(&reply).await?;

        self.transition(PipelineState::Idle);
        Ok(TurnOutcome::Completed)
    }

    async fn not_caught(&mut self) -> TurnOutcome {
        let notice = self.options.phrases.not_caught.clone();
        if let Err(e) = self.speech.speak(&notice).await {
            tracing::warn!(error = %e, "failed to speak notice");
        }
        self.transition(PipelineState::Listening);
        TurnOutcome::Empty
    }

    /// Error → apology → Listening
    async fn fail(&mut self, error: &Error) {
        self.transition(PipelineState::Error);
        tracing::warn!(error = %error, "turn failed");

        let apology = self.options.phrases.apology.clone();
        if let Err(e) = self.speech.speak(&apology).await {
            tracing::warn!(error = %e, "failed to speak apology");
        }

        self.recover(error).await;
        self.transition(PipelineState::Listening);
    }

    async fn recover(&mut self, error: &Error) {
        if !error.needs_reopen() {
            return;
        }
        match self.source.reopen().await {
            Ok(()) => tracing::info!("audio input reopened"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to reopen audio input, retrying next cycle");
                tokio::time::sleep(RECOVERY_DELAY).await;
            }
        }
    }

    /// Stop playback and wait for the sink, then release the input device
    async fn shutdown(&mut self) {
        self.speech.stop_all_and_wait().await;
        self.source.close();
        self.transition(PipelineState::Idle);
    }

    fn transition(&mut self, next: PipelineState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            tracing::warn!(from = %from, to = %next, "unexpected state transition");
        }
        self.state = next;
        tracing::debug!(from = %from, to = %next, "state transition");
        let _ = self.transitions.send(Transition { from, to: next });
    }
}

/// Result of one `step`
enum Step {
    /// Listening ended without a trigger
    Idle,
    /// A trigger fired and a turn ran
    Turn(Result<TurnOutcome>),
    /// Listening failed in a way the loop cannot survive
    Fatal(Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        type S = PipelineState;
        let path = [
            S::Idle,
            S::Listening,
            S::Acknowledging,
            S::Capturing,
            S::Transcribing,
            S::Dispatching,
            S::Speaking,
            S::Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        type S = PipelineState;
        assert!(!S::Listening.can_transition_to(S::Speaking));
        assert!(!S::Idle.can_transition_to(S::Capturing));
        assert!(!S::Error.can_transition_to(S::Dispatching));
        assert!(S::Speaking.can_transition_to(S::Error));
        assert!(S::Error.can_transition_to(S::Listening));
    }

    #[test]
    fn test_display() {
        assert_eq!(PipelineState::Transcribing.to_string(), "transcribing");
    }

    #[test]
    fn test_default_phrases() {
        let phrases = Phrases::default();
        assert_eq!(phrases.acknowledge, "Yes?");
        assert_eq!(phrases.not_caught, "I didn't catch that.");
    }
}
