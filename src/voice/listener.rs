//! Always-on listener
//!
//! Runs the fixed two-thread pipeline (producer and consumer) and exposes the
//! blocking calls a conversation loop needs: wait for the wake word, wait for
//! the utterance, fetch its transcript.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::producer::run_producer;
use super::{
    FrameBuffer, FrameSource, HandoffChannels, KeywordSpotter, ListenControl, SpeakingGuard,
    Transcriber, Utterance, UtteranceStateMachine,
};
use crate::config::ListenerConfig;
use crate::{Error, Result};

/// Background wake word listener and utterance segmenter
///
/// None of the `wait_*` calls time out on their own; use the `_timeout`
/// variants where a caller must not block forever (for example when the
/// audio device may disappear).
pub struct Listener {
    buffer: Arc<FrameBuffer>,
    channels: Arc<HandoffChannels>,
    control: Arc<ListenControl>,
    producer: Option<JoinHandle<Result<()>>>,
    consumer: Option<JoinHandle<()>>,
}

impl Listener {
    /// Start listening
    ///
    /// `open_source` runs on the producer thread, so sources that are not
    /// `Send` (such as cpal streams) can be used.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the source cannot be
    /// opened, or a pipeline thread cannot be spawned
    pub fn start<Src, Open, S, T>(
        config: &ListenerConfig,
        open_source: Open,
        spotter: S,
        transcriber: T,
    ) -> Result<Self>
    where
        Src: FrameSource,
        Open: FnOnce() -> Result<Src> + Send + 'static,
        S: KeywordSpotter + 'static,
        T: Transcriber + 'static,
    {
        config.validate()?;

        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity));
        let channels = Arc::new(HandoffChannels::new());
        let control = Arc::new(ListenControl::new(config.mute_grace));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let producer = thread::Builder::new()
            .name("earshot-producer".to_string())
            .spawn({
                let buffer = Arc::clone(&buffer);
                let control = Arc::clone(&control);
                move || {
                    let mut source = match open_source() {
                        Ok(source) => {
                            let _ = ready_tx.send(Ok(()));
                            source
                        }
                        Err(e) => {
                            let message = e.to_string();
                            let _ = ready_tx.send(Err(e));
                            return Err(Error::Audio(message));
                        }
                    };
                    run_producer(&mut source, &buffer, &control)
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = producer.join();
                return Err(e);
            }
            Err(_) => {
                let _ = producer.join();
                return Err(Error::Audio(
                    "producer thread exited during startup".to_string(),
                ));
            }
        }

        let machine =
            UtteranceStateMachine::new(config, spotter, transcriber, Arc::clone(&channels));
        let idle_poll = config.idle_poll;
        let consumer = thread::Builder::new()
            .name("earshot-consumer".to_string())
            .spawn({
                let buffer = Arc::clone(&buffer);
                let control = Arc::clone(&control);
                move || machine.run(&buffer, &control, idle_poll)
            });
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                control.request_shutdown();
                let _ = producer.join();
                return Err(e.into());
            }
        };

        tracing::info!(
            sample_rate = config.sample_rate,
            frame_samples = config.frame_samples,
            batch_frames = config.batch_frames,
            "listener started"
        );

        Ok(Self {
            buffer,
            channels,
            control,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    /// Block until the wake word is heard; returns the spotted text
    pub fn wait_for_wake_word(&self) -> String {
        self.channels.wake_word.wait()
    }

    /// Like [`wait_for_wake_word`](Self::wait_for_wake_word) with a deadline
    pub fn wait_for_wake_word_timeout(&self, timeout: Duration) -> Option<String> {
        self.channels.wake_word.wait_timeout(timeout)
    }

    /// Block until an utterance has been segmented
    pub fn wait_for_utterance_ready(&self) -> Utterance {
        self.channels.utterance.wait()
    }

    /// Like [`wait_for_utterance_ready`](Self::wait_for_utterance_ready) with a deadline
    pub fn wait_for_utterance_timeout(&self, timeout: Duration) -> Option<Utterance> {
        self.channels.utterance.wait_timeout(timeout)
    }

    /// Block until a transcript is ready and consume it
    ///
    /// A failed transcription produces no transcript, so prefer
    /// [`try_transcript`](Self::try_transcript) right after
    /// [`wait_for_utterance_ready`](Self::wait_for_utterance_ready) returns.
    pub fn get_transcript(&self) -> String {
        self.channels.transcript.wait()
    }

    /// Like [`get_transcript`](Self::get_transcript) with a deadline
    pub fn transcript_timeout(&self, timeout: Duration) -> Option<String> {
        self.channels.transcript.wait_timeout(timeout)
    }

    /// Consume a latched transcript without blocking
    pub fn try_transcript(&self) -> Option<String> {
        self.channels.transcript.try_take()
    }

    /// Stop processing audio until [`resume_listening`](Self::resume_listening)
    ///
    /// An utterance in progress is kept and continues on resume.
    pub fn pause_listening(&self) {
        self.control.pause();
    }

    /// Resume after [`pause_listening`](Self::pause_listening)
    pub fn resume_listening(&self) {
        self.control.resume();
    }

    /// True while paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Mute wake detection while the system speaks
    ///
    /// Hold the guard for the duration of the spoken phrase; the mute clears
    /// a short grace period after it is dropped.
    pub fn suppress_while_speaking(&self) -> SpeakingGuard {
        SpeakingGuard::new(Arc::clone(&self.control))
    }

    /// True while muted for speech output
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.control.is_muted()
    }

    /// Shared pipeline flags, for components that outlive a borrow
    #[must_use]
    pub fn control(&self) -> Arc<ListenControl> {
        Arc::clone(&self.control)
    }

    /// Frames waiting in the capture buffer
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    /// Frames dropped because the consumer fell behind
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.buffer.dropped()
    }

    /// True once the producer has exited (device lost or shutdown)
    #[must_use]
    pub fn producer_finished(&self) -> bool {
        self.producer.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop both pipeline threads and wait for them
    ///
    /// # Errors
    ///
    /// Returns the producer's error if the audio source failed, or an error
    /// if a pipeline thread panicked
    pub fn shutdown(&mut self) -> Result<()> {
        self.control.request_shutdown();

        if let Some(consumer) = self.consumer.take() {
            consumer
                .join()
                .map_err(|_| Error::Audio("consumer thread panicked".to_string()))?;
        }

        let result = match self.producer.take() {
            Some(producer) => producer
                .join()
                .map_err(|_| Error::Audio("producer thread panicked".to_string()))?,
            None => Ok(()),
        };

        tracing::info!("listener stopped");
        result
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.producer.is_some() || self.consumer.is_some() {
            if let Err(e) = self.shutdown() {
                tracing::debug!(error = %e, "listener stopped with error");
            }
        }
    }
}
