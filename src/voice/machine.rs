//! Utterance state machine
//!
//! Consumes batches from the frame buffer, spots the wake word while idle,
//! captures the following utterance and decides when it has ended.
//!
//! Elapsed time is measured on the audio clock (samples drained), so a slow
//! transcription call never makes a pause look longer than it was.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::vad::{self, NoiseFloorEstimator};
use super::{
    Frame, FrameBuffer, Gate, HandoffChannels, KeywordSpotter, ListenControl, Transcriber,
    Utterance,
};
use crate::config::{ListenerConfig, samples_to_duration};

/// Capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    /// Listening for the wake word
    Idle,
    /// Wake word heard, capturing the command
    CapturingUtterance,
}

/// What a single batch did to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Listening paused; batch discarded
    Paused,
    /// System speaking; batch discarded
    Muted,
    /// Idle and quiet; noise floor updated
    Silence,
    /// Idle and loud, no wake word yet
    Listening,
    /// Wake word spotted; capture started
    WakeWord,
    /// Speech appended to the utterance
    Capturing,
    /// Silence inside the utterance, shorter than the pause bound
    ShortPause,
    /// Utterance ended and handed off
    Finalized,
}

/// Wake word and end-of-utterance detection over scored batches
pub struct UtteranceStateMachine<S, T> {
    spotter: S,
    transcriber: T,
    channels: Arc<HandoffChannels>,
    noise: NoiseFloorEstimator,
    state: UtteranceState,
    wake_run: VecDeque<Frame>,
    accumulated: Vec<Frame>,
    need_more: bool,
    clock: Duration,
    last_voice_at: Duration,
    sample_rate: u32,
    batch_frames: usize,
    max_run_frames: usize,
    short_pause: Duration,
}

impl<S: KeywordSpotter, T: Transcriber> UtteranceStateMachine<S, T> {
    /// Create an idle machine signaling on `channels`
    pub fn new(
        config: &ListenerConfig,
        spotter: S,
        transcriber: T,
        channels: Arc<HandoffChannels>,
    ) -> Self {
        let frame = config.frame_duration();
        let run_frames = if frame.is_zero() {
            config.batch_frames
        } else {
            usize::try_from(config.wake_window.as_nanos().div_ceil(frame.as_nanos()))
                .unwrap_or(usize::MAX)
        };

        Self {
            spotter,
            transcriber,
            channels,
            noise: NoiseFloorEstimator::new(
                config.noise_window,
                config.threshold_multiplier,
                config.min_threshold,
            ),
            state: UtteranceState::Idle,
            wake_run: VecDeque::new(),
            accumulated: Vec::new(),
            need_more: false,
            clock: Duration::ZERO,
            last_voice_at: Duration::ZERO,
            sample_rate: config.sample_rate,
            batch_frames: config.batch_frames,
            max_run_frames: run_frames.max(config.batch_frames),
            short_pause: config.short_pause,
        }
    }

    /// Advance the machine by one batch
    pub fn process_batch(&mut self, batch: Vec<Frame>, gate: Gate) -> Tick {
        let samples: usize = batch.iter().map(Frame::len).sum();
        self.clock += samples_to_duration(samples, self.sample_rate);

        match gate {
            Gate::Paused => return Tick::Paused,
            Gate::Muted => {
                if self.state == UtteranceState::Idle {
                    self.wake_run.clear();
                    self.need_more = false;
                }
                return Tick::Muted;
            }
            Gate::Open => {}
        }

        let energy = vad::score(&batch);
        let loud = vad::is_speech(energy, self.noise.threshold());
        let voiced = loud || self.need_more;
        self.need_more = false;

        match self.state {
            UtteranceState::Idle => self.idle(batch, energy, loud, voiced),
            UtteranceState::CapturingUtterance => self.capturing(batch, voiced),
        }
    }

    fn idle(&mut self, batch: Vec<Frame>, energy: f64, loud: bool, voiced: bool) -> Tick {
        self.wake_run.extend(batch);

        if !voiced {
            self.wake_run.clear();
            let threshold = self.noise.observe(energy);
            tracing::trace!(energy, threshold, "noise floor updated");
            return Tick::Silence;
        }

        let run: Vec<i16> = concat(self.wake_run.iter());
        let spotted = match self.spotter.spot(&run, self.sample_rate) {
            Ok(spotted) => spotted,
            Err(e) => {
                tracing::warn!(error = %e, "keyword spotting failed");
                None
            }
        };

        if let Some(text) = spotted {
            tracing::info!(wake_word = %text, energy, "wake word detected");
            self.wake_run.clear();
            self.accumulated.clear();
            self.state = UtteranceState::CapturingUtterance;
            self.last_voice_at = self.clock;
            // The phrase may straddle this tick
            self.need_more = true;
            self.channels.wake_word.signal(text);
            return Tick::WakeWord;
        }

        if loud {
            self.need_more = true;
        }
        while self.wake_run.len() > self.max_run_frames {
            let oldest = self.batch_frames.min(self.wake_run.len());
            self.wake_run.drain(..oldest);
        }
        tracing::trace!(run_frames = self.wake_run.len(), energy, "no wake word in run");
        Tick::Listening
    }

    fn capturing(&mut self, batch: Vec<Frame>, voiced: bool) -> Tick {
        self.accumulated.extend(batch);

        if voiced {
            self.last_voice_at = self.clock;
            return Tick::Capturing;
        }

        let silent_for = self.clock.saturating_sub(self.last_voice_at);
        if silent_for < self.short_pause {
            tracing::trace!(silent_ms = silent_for.as_millis(), "short pause inside utterance");
            return Tick::ShortPause;
        }

        self.finalize();
        Tick::Finalized
    }

    fn finalize(&mut self) {
        let utterance = Utterance {
            samples: concat(self.accumulated.iter()),
            sample_rate: self.sample_rate,
        };
        self.accumulated.clear();
        self.state = UtteranceState::Idle;
        self.need_more = false;

        tracing::info!(
            duration_ms = utterance.duration().as_millis(),
            "utterance complete"
        );

        match self.transcriber.transcribe(&utterance.samples, self.sample_rate) {
            Ok(text) => self.channels.transcript.signal(text),
            Err(e) => tracing::warn!(error = %e, "transcription failed, no transcript"),
        }
        self.channels.utterance.signal(utterance);
    }

    /// Drain batches from `buffer` until shutdown
    ///
    /// Sleeps `idle_poll` whenever fewer than one batch of frames is buffered.
    pub fn run(mut self, buffer: &FrameBuffer, control: &ListenControl, idle_poll: Duration) {
        tracing::debug!(batch_frames = self.batch_frames, "consumer started");

        while !control.is_shutdown() {
            let batch = buffer.drain_front(self.batch_frames);
            if batch.is_empty() {
                thread::sleep(idle_poll);
                continue;
            }

            let tick = self.process_batch(batch, control.gate());
            tracing::trace!(?tick, state = ?self.state, "batch processed");
        }

        tracing::debug!(state = ?self.state, "consumer stopped");
    }

    /// Current capture state
    #[must_use]
    pub const fn state(&self) -> UtteranceState {
        self.state
    }

    /// Current speech threshold
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.noise.threshold()
    }

    /// Frames captured for the current utterance
    #[must_use]
    pub fn accumulated_frames(&self) -> usize {
        self.accumulated.len()
    }

    /// Frames in the rolling wake word run
    #[must_use]
    pub fn wake_run_frames(&self) -> usize {
        self.wake_run.len()
    }

    /// Audio time processed so far
    #[must_use]
    pub const fn clock(&self) -> Duration {
        self.clock
    }
}

fn concat<'a>(frames: impl Iterator<Item = &'a Frame>) -> Vec<i16> {
    frames.flat_map(Frame::samples).copied().collect()
}
