//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use earshot::{Frame, FrameSource, ListenerConfig, ReadError, Result};

/// Quiet background level used to train the noise floor
pub const SILENCE: i16 = 100;

/// Frames per batch in the test configuration
pub const BATCH: usize = 4;

/// Listener configuration with 256 ms batches (4 × 1024 samples at 16 kHz)
#[must_use]
pub fn test_config() -> ListenerConfig {
    ListenerConfig::default()
}

/// Configuration for threaded runs: small frames, no drops, fast polling
#[must_use]
pub fn fast_config() -> ListenerConfig {
    ListenerConfig {
        frame_samples: 256,
        buffer_capacity: 4096,
        short_pause: Duration::from_millis(300),
        idle_poll: Duration::from_millis(1),
        mute_grace: Duration::ZERO,
        ..ListenerConfig::default()
    }
}

/// One frame of constant amplitude
#[must_use]
pub fn frame(config: &ListenerConfig, amplitude: i16) -> Frame {
    Frame::new(vec![amplitude; config.frame_samples])
}

/// One batch of constant amplitude; its RMS energy equals `amplitude`
#[must_use]
pub fn batch(config: &ListenerConfig, amplitude: i16) -> Vec<Frame> {
    (0..config.batch_frames)
        .map(|_| frame(config, amplitude))
        .collect()
}

/// Frames for `batches` consecutive batches of constant amplitude
#[must_use]
pub fn frames(config: &ListenerConfig, amplitude: i16, batches: usize) -> Vec<Frame> {
    (0..batches * config.batch_frames)
        .map(|_| frame(config, amplitude))
        .collect()
}

/// Call counter shared between a test and its collaborators
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spotter that reports `text` once the run reaches `min_samples` and
/// holds a sample at or above `min_amplitude`
pub fn spotter_for(
    text: &'static str,
    min_samples: usize,
    min_amplitude: i16,
    calls: Calls,
) -> impl Fn(&[i16], u32) -> Result<Option<String>> + Send {
    move |audio: &[i16], _: u32| {
        calls.hit();
        let heard = audio.len() >= min_samples && audio.iter().any(|s| *s >= min_amplitude);
        Ok(heard.then(|| text.to_string()))
    }
}

/// Spotter that hears `text` in any run
pub fn always_spots(
    text: &'static str,
    calls: Calls,
) -> impl Fn(&[i16], u32) -> Result<Option<String>> + Send {
    spotter_for(text, 0, i16::MIN, calls)
}

/// Transcriber that returns `text` for every utterance
pub fn transcribes_to(
    text: &'static str,
    calls: Calls,
) -> impl Fn(&[i16], u32) -> Result<String> + Send {
    move |_: &[i16], _: u32| {
        calls.hit();
        Ok(text.to_string())
    }
}

/// In-memory frame source
///
/// Plays a script of frames, then either repeats `tail` forever or reports
/// the device lost.
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    tail: Option<Frame>,
    pace: Duration,
}

impl ScriptedSource {
    /// Play `frames`, then keep yielding `tail`
    #[must_use]
    pub fn looping(frames: Vec<Frame>, tail: Frame) -> Self {
        Self {
            frames: frames.into(),
            tail: Some(tail),
            pace: Duration::from_micros(200),
        }
    }

    /// Play `frames`, then fail as if the device was unplugged
    #[must_use]
    pub fn ending(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            tail: None,
            pace: Duration::from_micros(200),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> std::result::Result<Frame, ReadError> {
        thread::sleep(self.pace);
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        self.tail
            .clone()
            .ok_or_else(|| ReadError::Fatal("device unplugged".to_string()))
    }
}
