//! Atlas - wake-word voice assistant loop
//!
//! This library provides the turn-taking audio pipeline behind the `atlas`
//! binary:
//! - Audio capture, silence endpointing, and wake word gating
//! - Speech recognition, dialogue, and speech synthesis backends
//! - The turn controller state machine that coordinates them
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   TurnController                      │
//! │  Listening → Capturing → Transcribing → Speaking     │
//! └──────┬──────────────┬───────────────┬────────────────┘
//!        │              │               │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌──────▼──────────────┐
//! │ AudioSource │ │ Transcriber│ │ SpeechOutput         │
//! │ WakeGate    │ │ Dialogue   │ │ Synthesizer + Sink   │
//! │ Endpointer  │ │            │ │                      │
//! └─────────────┘ └────────────┘ └──────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod daemon;
pub mod error;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use turn::{PipelineState, SessionSummary, TurnController, TurnOptions};
