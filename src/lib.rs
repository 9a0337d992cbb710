//! Earshot - always-on wake word listener for voice assistants
//!
//! This library provides the audio side of a voice assistant:
//! - Continuous microphone capture into a bounded, drop-oldest buffer
//! - Energy-based voice activity detection against an adaptive noise floor
//! - Wake word spotting and utterance segmentation
//! - Blocking handoff of wake words, utterances and transcripts to a caller
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────────────┐
//! │  producer    │──►│ FrameBuffer  │──►│ UtteranceStateMachine │
//! │ (mic thread) │   │ (bounded)    │   │ (consumer thread)     │
//! └──────────────┘   └──────────────┘   └──────────┬────────────┘
//!                                                  │ spot / transcribe
//!                                       ┌──────────▼────────────┐
//!                                       │   HandoffChannels     │
//!                                       │ wake · utterance · txt│
//!                                       └──────────┬────────────┘
//!                                                  ▼
//!                                          conversation loop
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::{Config, ListenerConfig, SttConfig};
pub use error::{Error, Result};
pub use voice::{
    Frame, FrameBuffer, FrameSource, HandoffChannels, HandoffSlot, KeywordSpotter, Listener,
    MicSource, PhraseSpotter, ReadError, SpeakingGuard, Transcriber, Utterance, UtteranceState,
    UtteranceStateMachine, WhisperTranscriber,
};
