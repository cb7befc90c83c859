//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;

use atlas_voice::Error;
use atlas_voice::agent::ConversationHistory;
use atlas_voice::voice::{
    AudioFormat, DetectorState, EndpointConfig, EndpointStatus, Endpointer, EnergyTrigger,
    PhraseTrigger, SegmentTiming, TriggerClassifier, WakeGate, samples_to_wav,
};

mod common;
use common::{MockTranscriber, ScriptedClassifier, frame};

fn endpointer() -> Endpointer {
    Endpointer::new(EndpointConfig::default(), AudioFormat::default())
}

#[test]
fn test_utterance_ends_after_sustained_silence() {
    let mut ep = endpointer();
    ep.start();

    for _ in 0..30 {
        assert_eq!(ep.feed(frame(2000)), EndpointStatus::Continue);
    }
    for _ in 0..46 {
        assert_eq!(ep.feed(frame(0)), EndpointStatus::Continue);
    }
    assert_eq!(ep.feed(frame(0)), EndpointStatus::Endpointed);

    let utterance = ep.finish();
    assert_eq!(utterance.len(), 77);
    assert_eq!(utterance.voiced_frames(), 30);
    assert!(!utterance.is_effectively_silent(std::time::Duration::from_millis(100)));
}

#[test]
fn test_continuous_speech_times_out() {
    let mut ep = endpointer();
    ep.start();

    // 31 seconds of speech at 16 kHz / 512 samples per frame
    let mut status = EndpointStatus::Continue;
    let mut fed = 0;
    while status == EndpointStatus::Continue && fed < 969 {
        status = ep.feed(frame(2000));
        fed += 1;
    }

    assert_eq!(status, EndpointStatus::TimedOut);
    assert_eq!(fed, 938);
    assert_eq!(ep.finish().len(), 938);
}

#[test]
fn test_utterance_wav_matches_capture() {
    let mut ep = endpointer();
    ep.start();
    for _ in 0..4 {
        ep.feed(frame(1234));
    }
    let utterance = ep.finish();

    let wav = utterance.to_wav().unwrap();
    let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    assert_eq!(samples, utterance.samples());
}

#[test]
fn test_samples_to_wav_stereo() {
    let wav = samples_to_wav(&[1, -1, 2, -2], 48000, 2).unwrap();
    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.duration(), 2);
}

#[tokio::test]
async fn test_sustained_score_fires_once() {
    let classifier = ScriptedClassifier::new(vec![0.9; 20]);
    let resets = Arc::clone(&classifier.resets);
    let mut gate = WakeGate::new(Box::new(classifier), 0.5);

    let mut fired = 0;
    for _ in 0..20 {
        if gate.feed(&frame(0)).await {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);
    assert!(!gate.is_armed());
    assert_eq!(resets.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Scores are exhausted, so the next frame scores zero and re-arms
    assert!(!gate.feed(&frame(0)).await);
    assert!(gate.is_armed());
}

#[tokio::test]
async fn test_energy_trigger_ignores_silence() {
    let mut gate = WakeGate::new(Box::new(EnergyTrigger::default()), 0.5);

    // Two seconds of silence
    for _ in 0..63 {
        assert!(!gate.feed(&frame(0)).await);
    }
}

#[tokio::test]
async fn test_energy_trigger_fires_on_spike() {
    let mut trigger = EnergyTrigger::default();

    // Settle the moving average on room noise
    for _ in 0..100 {
        assert!(trigger.score(&frame(200)).await.unwrap() < f32::EPSILON);
    }
    let score = trigger.score(&frame(8000)).await.unwrap();
    assert!(score > 0.5, "score was {score}");
}

#[tokio::test]
async fn test_phrase_trigger_verifies_segment() {
    let transcriber = Arc::new(MockTranscriber::new(vec![Ok("Hey Atlas, you there?".into())]));
    let mut trigger = PhraseTrigger::new(
        vec!["Hey Atlas".to_string()],
        transcriber.clone(),
        SegmentTiming::default(),
    );
    assert_eq!(trigger.phrases(), ["hey atlas"]);

    for _ in 0..15 {
        assert!(trigger.score(&frame(2000)).await.unwrap() < f32::EPSILON);
    }
    assert_eq!(trigger.state(), DetectorState::Listening);

    let mut best = 0.0f32;
    for _ in 0..20 {
        best = best.max(trigger.score(&frame(0)).await.unwrap());
    }

    assert!((best - 1.0).abs() < f32::EPSILON);
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(trigger.state(), DetectorState::Idle);
}

#[tokio::test]
async fn test_phrase_trigger_surfaces_stt_failure() {
    let transcriber = Arc::new(MockTranscriber::new(vec![Err(Error::Transcription(
        "timeout".into(),
    ))]));
    let mut trigger =
        PhraseTrigger::new(vec!["atlas".to_string()], transcriber, SegmentTiming::default());

    for _ in 0..15 {
        trigger.score(&frame(2000)).await.unwrap();
    }

    let mut failure = None;
    for _ in 0..20 {
        if let Err(e) = trigger.score(&frame(0)).await {
            failure = Some(e);
            break;
        }
    }
    assert!(matches!(failure, Some(Error::WakeWord(_))));
}

#[tokio::test]
async fn test_gate_treats_classifier_error_as_zero() {
    let transcriber = Arc::new(MockTranscriber::new(vec![Err(Error::Transcription(
        "timeout".into(),
    ))]));
    let trigger =
        PhraseTrigger::new(vec!["atlas".to_string()], transcriber, SegmentTiming::default());
    let mut gate = WakeGate::new(Box::new(trigger), 0.5);

    for _ in 0..15 {
        assert!(!gate.feed(&frame(2000)).await);
    }
    for _ in 0..20 {
        assert!(!gate.feed(&frame(0)).await);
    }
    assert!(gate.is_armed());
}

#[test]
fn test_history_evicts_whole_exchanges() {
    let mut history = ConversationHistory::new(2);
    history.record_exchange("one", "1");
    history.record_exchange("two", "2");
    history.record_exchange("three", "3");

    let texts: Vec<&str> = history.turns().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, ["two", "2", "three", "3"]);
}
