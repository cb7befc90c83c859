//! Voice processing module
//!
//! Handles audio capture, endpointing, wake word detection, speech
//! recognition, synthesis, and playback.

mod capture;
mod endpoint;
mod frame;
mod playback;
mod resample;
mod speech;
mod stt;
mod tts;
mod wake_word;

pub use capture::{AudioSource, CpalSource};
pub use endpoint::{EndpointConfig, EndpointStatus, Endpointer, Utterance, samples_to_wav};
pub use frame::{
    AudioFormat, AudioFrame, FRAME_SIZE, SAMPLE_RATE, f32_to_i16, i16_to_f32, mean_amplitude, rms,
};
pub use playback::{AudioSink, CpalSink, STOP_POLL_INTERVAL};
pub use resample::{RateConverter, convert_clip};
pub use speech::{PlaybackHandle, SpeechOutput};
pub use stt::{DeepgramTranscriber, EncodedAudio, OPENAI_API_BASE, Transcriber, WhisperTranscriber};
pub use tts::{
    EspeakSynthesizer, OpenAiSpeech, SynthesizedAudio, Synthesizer, decode_mp3, decode_wav,
};
pub use wake_word::{
    DetectorState, EnergyTrigger, PhraseTrigger, SegmentTiming, TriggerClassifier, WakeGate,
};
