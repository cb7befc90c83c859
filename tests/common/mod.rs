//! Shared test utilities
//!
//! Scripted stand-ins for the audio device and the external backends, so
//! the whole voice loop runs without hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use atlas_voice::agent::{ConversationHistory, DialogueBackend};
use atlas_voice::voice::{
    AudioFormat, AudioFrame, AudioSink, AudioSource, EncodedAudio, SpeechOutput,
    SynthesizedAudio, Synthesizer, Transcriber, TriggerClassifier,
};
use atlas_voice::{Error, Result};

/// A frame whose every sample has magnitude `amplitude`
#[must_use]
pub fn frame(amplitude: i16) -> AudioFrame {
    let format = AudioFormat::default();
    let samples: Vec<i16> = (0..format.frame_len())
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect();
    AudioFrame::new(samples, format.sample_rate, format.channels)
}

/// `count` copies of `frame(amplitude)`
#[must_use]
pub fn frames(count: usize, amplitude: i16) -> Vec<ScriptItem> {
    (0..count).map(|_| ScriptItem::Frame(frame(amplitude))).collect()
}

/// One step of a scripted input stream
#[derive(Debug, Clone)]
pub enum ScriptItem {
    Frame(AudioFrame),
    /// Simulate a device dropout
    Dropout,
}

/// Observable side effects of a `ScriptedSource`
#[derive(Debug, Default)]
pub struct SourceProbe {
    pub reads: AtomicUsize,
    pub flushes: AtomicUsize,
    pub reopens: AtomicUsize,
    pub closed: AtomicBool,
}

/// Plays back a fixed script, then requests shutdown and waits forever
pub struct ScriptedSource {
    script: VecDeque<ScriptItem>,
    shutdown: CancellationToken,
    probe: Arc<SourceProbe>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(script: Vec<ScriptItem>, shutdown: CancellationToken) -> (Self, Arc<SourceProbe>) {
        let probe = Arc::new(SourceProbe::default());
        let source = Self {
            script: script.into(),
            shutdown,
            probe: Arc::clone(&probe),
        };
        (source, probe)
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        if self.probe.closed.load(Ordering::SeqCst) {
            return Err(Error::Stream("source is closed".into()));
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(ScriptItem::Frame(frame)) => Ok(frame),
            Some(ScriptItem::Dropout) => Err(Error::Stream("device unplugged".into())),
            None => {
                self.shutdown.cancel();
                std::future::pending().await
            }
        }
    }

    fn flush(&mut self) {
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
    }

    async fn reopen(&mut self) -> Result<()> {
        self.probe.reopens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Returns queued scores in order, then zero
pub struct ScriptedClassifier {
    scores: VecDeque<f32>,
    pub resets: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    #[must_use]
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            scores: scores.into(),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Score 0 for `quiet` frames, then `score` once
    #[must_use]
    pub fn trigger_after(quiet: usize, score: f32) -> Self {
        let mut scores = vec![0.0; quiet];
        scores.push(score);
        Self::new(scores)
    }
}

#[async_trait]
impl TriggerClassifier for ScriptedClassifier {
    async fn score(&mut self, _frame: &AudioFrame) -> Result<f32> {
        Ok(self.scores.pop_front().unwrap_or(0.0))
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns queued transcripts, recording the audio it was given
#[derive(Default)]
pub struct MockTranscriber {
    responses: Mutex<VecDeque<Result<String>>>,
    pub received: Mutex<Vec<EncodedAudio>>,
}

impl MockTranscriber {
    #[must_use]
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            received: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String> {
        self.received.lock().push(audio.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Replies "reply to: <text>", recording how much history it saw
#[derive(Default)]
pub struct MockDialogue {
    pub requests: Mutex<Vec<(usize, String)>>,
    pub fail: bool,
}

impl MockDialogue {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl DialogueBackend for MockDialogue {
    async fn reply(&self, history: &ConversationHistory, user_text: &str) -> Result<String> {
        self.requests
            .lock()
            .push((history.len(), user_text.to_string()));
        if self.fail {
            return Err(Error::Dialogue("model unavailable".into()));
        }
        Ok(format!("reply to: {user_text}"))
    }
}

/// Never answers; used to test shutdown during a backend call
pub struct StalledDialogue;

#[async_trait]
impl DialogueBackend for StalledDialogue {
    async fn reply(&self, _history: &ConversationHistory, _user_text: &str) -> Result<String> {
        std::future::pending().await
    }
}

/// Records every text it is asked to speak
#[derive(Default)]
pub struct RecordingSynth {
    pub spoken: Mutex<Vec<String>>,
}

impl RecordingSynth {
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.spoken.lock().iter().filter(|t| *t == text).count()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynth {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        self.spoken.lock().push(text.to_string());
        Ok(SynthesizedAudio::new(vec![0.0; 240], 24000, 1))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Accepts audio and returns immediately
#[derive(Default)]
pub struct NullSink {
    pub played: AtomicUsize,
}

impl AudioSink for NullSink {
    fn play(&self, _audio: &SynthesizedAudio, _stop: &CancellationToken) -> Result<()> {
        self.played.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Returns at once for the first `hold_from` plays, then blocks each play
/// until it is stopped
#[derive(Default)]
pub struct HoldingSink {
    hold_from: usize,
    pub calls: AtomicUsize,
    pub interrupted: AtomicUsize,
}

impl HoldingSink {
    #[must_use]
    pub fn holding_from(hold_from: usize) -> Self {
        Self {
            hold_from,
            ..Self::default()
        }
    }
}

impl AudioSink for HoldingSink {
    fn play(&self, _audio: &SynthesizedAudio, stop: &CancellationToken) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.hold_from {
            return Ok(());
        }
        for _ in 0..1000 {
            if stop.is_cancelled() {
                self.interrupted.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Speech output backed by a recording synthesizer and a null sink
#[must_use]
pub fn recording_speech() -> (SpeechOutput, Arc<RecordingSynth>) {
    let synth = Arc::new(RecordingSynth::default());
    let speech = SpeechOutput::new(synth.clone(), Arc::new(NullSink::default()));
    (speech, synth)
}
