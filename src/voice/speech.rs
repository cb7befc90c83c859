//! Speech output with stoppable playback
//!
//! At most one playback is active. Starting a new one stops the previous
//! playback first.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::playback::AudioSink;
use super::tts::Synthesizer;
use crate::{Error, Result};

/// Handle to a playback started with [`SpeechOutput::speak_async`]
#[derive(Debug)]
pub struct PlaybackHandle {
    id: u64,
    token: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl PlaybackHandle {
    /// Request early termination. Best effort.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the worker has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for synthesis and playback to end
    ///
    /// # Errors
    ///
    /// Returns the synthesis or playback error, if any
    pub async fn wait(self) -> Result<()> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Playback(format!("playback task failed: {e}"))),
        }
    }
}

/// The currently active playback, as seen by the owner
struct Active {
    id: u64,
    token: CancellationToken,
}

/// Synthesizes text and plays it through a sink
///
/// Only one worker holds the sink at a time. A new playback cancels the
/// previous one and waits for its `play` call to return before starting.
pub struct SpeechOutput {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    active: Arc<Mutex<Option<Active>>>,
    sink_lock: Arc<tokio::sync::Mutex<()>>,
    next_id: Mutex<u64>,
}

impl SpeechOutput {
    /// Create a speech output
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            synthesizer,
            sink,
            active: Arc::new(Mutex::new(None)),
            sink_lock: Arc::new(tokio::sync::Mutex::new(())),
            next_id: Mutex::new(0),
        }
    }

    /// Speak `text`, returning once playback has finished
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` or `Error::Playback`
    pub async fn speak(&self, text: &str) -> Result<()> {
        self.speak_async(text).wait().await
    }

    /// Speak `text` on a worker, returning immediately
    ///
    /// Any playback still running is stopped first.
    pub fn speak_async(&self, text: &str) -> PlaybackHandle {
        let token = CancellationToken::new();
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };

        if let Some(previous) = self.active.lock().replace(Active {
            id,
            token: token.clone(),
        }) {
            tracing::debug!(playback = previous.id, "stopping previous playback");
            previous.token.cancel();
        }

        let synthesizer = Arc::clone(&self.synthesizer);
        let sink = Arc::clone(&self.sink);
        let sink_lock = Arc::clone(&self.sink_lock);
        let active = Arc::clone(&self.active);
        let text = text.to_string();
        let worker_token = token.clone();

        let join = tokio::spawn(async move {
            let result = play_worker(synthesizer, sink, sink_lock, text, worker_token).await;

            let mut active = active.lock();
            if active.as_ref().is_some_and(|a| a.id == id) {
                *active = None;
            }
            result
        });

        PlaybackHandle { id, token, join }
    }

    /// Stop the playback behind `handle`
    pub fn stop(&self, handle: &PlaybackHandle) {
        handle.stop();
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == handle.id) {
            *active = None;
        }
    }

    /// Stop whatever is playing
    pub fn stop_all(&self) {
        if let Some(active) = self.active.lock().take() {
            tracing::debug!(playback = active.id, "stopping playback");
            active.token.cancel();
        }
    }

    /// Stop whatever is playing and wait until the sink is released
    pub async fn stop_all_and_wait(&self) {
        self.stop_all();
        let _released = self.sink_lock.lock().await;
    }

    /// Whether a playback is synthesizing or playing
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|a| !a.token.is_cancelled())
    }
}

/// Synthesize, then play while holding the sink
async fn play_worker(
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    sink_lock: Arc<tokio::sync::Mutex<()>>,
    text: String,
    token: CancellationToken,
) -> Result<()> {
    let audio = tokio::select! {
        () = token.cancelled() => return Ok(()),
        audio = synthesizer.synthesize(&text) => audio?,
    };

    // Waits for a cancelled predecessor to leave `play`
    let guard = tokio::select! {
        () = token.cancelled() => return Ok(()),
        guard = sink_lock.lock_owned() => guard,
    };
    if token.is_cancelled() {
        return Ok(());
    }

    tracing::debug!(
        backend = synthesizer.name(),
        duration_ms = audio.duration().as_millis(),
        "playing synthesized speech"
    );

    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        sink.play(&audio, &token)
    })
    .await
    .map_err(|e| Error::Playback(format!("playback worker failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::voice::tts::SynthesizedAudio;

    struct ToneSynth;

    #[async_trait]
    impl Synthesizer for ToneSynth {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio::new(vec![0.0; 2400], 24000, 1))
        }

        fn name(&self) -> &'static str {
            "tone"
        }
    }

    struct FailingSynth;

    #[async_trait]
    impl Synthesizer for FailingSynth {
        async fn synthesize(&self, _text: &str) -> Result<SynthesizedAudio> {
            Err(Error::Synthesis("backend down".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Blocks until stopped, counting completed and interrupted plays
    #[derive(Default)]
    struct HoldingSink {
        interrupted: AtomicUsize,
    }

    impl AudioSink for HoldingSink {
        fn play(&self, _audio: &SynthesizedAudio, stop: &CancellationToken) -> Result<()> {
            for _ in 0..500 {
                if stop.is_cancelled() {
                    self.interrupted.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    /// Polls like `CpalSink`, recording how many plays ever overlapped
    #[derive(Default)]
    struct OverlapSink {
        playing: AtomicUsize,
        peak: AtomicUsize,
        plays: AtomicUsize,
    }

    impl AudioSink for OverlapSink {
        fn play(&self, _audio: &SynthesizedAudio, stop: &CancellationToken) -> Result<()> {
            let now = self.playing.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.plays.fetch_add(1, Ordering::SeqCst);
            for _ in 0..10 {
                if stop.is_cancelled() {
                    break;
                }
                std::thread::sleep(crate::voice::STOP_POLL_INTERVAL);
            }
            self.playing.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct QuickSink;

    impl AudioSink for QuickSink {
        fn play(&self, _audio: &SynthesizedAudio, _stop: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_speech_stops_previous() {
        let sink = Arc::new(HoldingSink::default());
        let output = SpeechOutput::new(Arc::new(ToneSynth), sink.clone());

        let first = output.speak_async("one");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = output.speak_async("two");

        first.wait().await.unwrap();
        assert_eq!(sink.interrupted.load(Ordering::SeqCst), 1);

        output.stop(&second);
        second.wait().await.unwrap();
        assert!(!output.is_active());
    }

    #[tokio::test]
    async fn test_synthesis_error_surfaces() {
        let output = SpeechOutput::new(Arc::new(FailingSynth), Arc::new(HoldingSink::default()));
        let err = output.speak("hello").await.unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));
    }

    #[tokio::test]
    async fn test_plays_never_overlap() {
        let sink = Arc::new(OverlapSink::default());
        let output = SpeechOutput::new(Arc::new(ToneSynth), sink.clone());

        let first = output.speak_async("one");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = output.speak_async("two");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = output.speak_async("three");

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        third.wait().await.unwrap();

        assert_eq!(sink.peak.load(Ordering::SeqCst), 1);
        assert!(sink.plays.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_finished_playback_is_inactive() {
        let output = SpeechOutput::new(Arc::new(ToneSynth), Arc::new(QuickSink));
        output.speak("hello").await.unwrap();
        assert!(!output.is_active());
    }

    #[tokio::test]
    async fn test_stop_all_and_wait_releases_sink() {
        let sink = Arc::new(HoldingSink::default());
        let output = SpeechOutput::new(Arc::new(ToneSynth), sink.clone());

        let handle = output.speak_async("one");
        tokio::time::sleep(Duration::from_millis(30)).await;
        output.stop_all_and_wait().await;

        assert_eq!(sink.interrupted.load(Ordering::SeqCst), 1);
        assert!(!output.is_active());
        handle.wait().await.unwrap();
    }
}
