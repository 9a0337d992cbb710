//! Voice capture pipeline
//!
//! Microphone frames flow through a bounded buffer into a state machine that
//! spots the wake word, captures the following utterance and hands it to
//! transcription.
//!
//! ```text
//! FrameSource ─► producer ─► FrameBuffer ─► UtteranceStateMachine ─► HandoffChannels ─► caller
//!                                               │          ▲
//!                                               ▼          │
//!                                         KeywordSpotter / Transcriber
//! ```

mod control;
mod frame;
mod handoff;
mod listener;
mod machine;
mod producer;
mod source;
mod stt;
mod utterance;

pub mod vad;

pub use control::{Gate, ListenControl, SpeakingGuard};
pub use frame::{Frame, FrameBuffer};
pub use handoff::{HandoffChannels, HandoffSlot};
pub use listener::Listener;
pub use machine::{Tick, UtteranceState, UtteranceStateMachine};
pub use producer::run_producer;
pub use source::{FrameSource, MicSource, ReadError};
pub use stt::{KeywordSpotter, PhraseSpotter, Transcriber, WhisperTranscriber, strip_wake_word};
pub use utterance::{Utterance, samples_to_wav};
