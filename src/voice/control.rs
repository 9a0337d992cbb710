//! Pipeline-wide flags: listening pause, self-speech mute, shutdown

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How the consumer should treat the next batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Score and run the state machine
    Open,
    /// The system is speaking; discard the batch
    Muted,
    /// Listening is paused; discard the batch, keep captured audio
    Paused,
}

/// Flags shared by the pipeline threads and their callers
#[derive(Debug)]
pub struct ListenControl {
    paused: AtomicBool,
    shutdown: AtomicBool,
    speaking: AtomicUsize,
    unmute_at: Mutex<Option<Instant>>,
    mute_grace: Duration,
}

impl ListenControl {
    /// Create flags; the mute is held `mute_grace` past the end of speech
    #[must_use]
    pub const fn new(mute_grace: Duration) -> Self {
        Self {
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            speaking: AtomicUsize::new(0),
            unmute_at: Mutex::new(None),
            mute_grace,
        }
    }

    /// Stop scoring and state transitions until resumed
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::debug!("listening paused");
        }
    }

    /// Resume after [`pause`](Self::pause)
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::debug!("listening resumed");
        }
    }

    /// True while paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Mark the start of speech output
    pub fn begin_speaking(&self) {
        self.speaking.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("mute set");
    }

    /// Mark the end of speech output; the mute clears after the grace period
    pub fn end_speaking(&self) {
        let previous = self
            .speaking
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            *self.unmute_at.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Instant::now() + self.mute_grace);
            tracing::trace!(grace_ms = self.mute_grace.as_millis(), "mute releasing");
        }
    }

    /// True while speaking or within the grace period after it
    #[must_use]
    pub fn is_muted(&self) -> bool {
        if self.speaking.load(Ordering::SeqCst) > 0 {
            return true;
        }
        self.unmute_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| Instant::now() < at)
    }

    /// Ask both pipeline threads to exit
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// True once shutdown has been requested
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Gate for the next batch; pause wins over mute
    #[must_use]
    pub fn gate(&self) -> Gate {
        if self.is_paused() {
            Gate::Paused
        } else if self.is_muted() {
            Gate::Muted
        } else {
            Gate::Open
        }
    }
}

/// Holds the mute flag for as long as it lives
///
/// Create one around each spoken phrase so the listener does not wake on
/// its own voice.
#[derive(Debug)]
#[must_use = "the mute is released as soon as the guard is dropped"]
pub struct SpeakingGuard {
    control: Arc<ListenControl>,
}

impl SpeakingGuard {
    /// Set the mute flag until the guard is dropped
    pub fn new(control: Arc<ListenControl>) -> Self {
        control.begin_speaking();
        Self { control }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.control.end_speaking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_resume() {
        let control = ListenControl::new(Duration::ZERO);
        assert_eq!(control.gate(), Gate::Open);

        control.pause();
        assert_eq!(control.gate(), Gate::Paused);

        control.resume();
        assert_eq!(control.gate(), Gate::Open);
    }

    #[test]
    fn test_guard_mutes_until_dropped() {
        let control = Arc::new(ListenControl::new(Duration::ZERO));

        let guard = SpeakingGuard::new(Arc::clone(&control));
        assert!(control.is_muted());
        assert_eq!(control.gate(), Gate::Muted);

        drop(guard);
        assert!(!control.is_muted());
    }

    #[test]
    fn test_grace_period_holds_mute() {
        let control = Arc::new(ListenControl::new(Duration::from_millis(40)));

        drop(SpeakingGuard::new(Arc::clone(&control)));
        assert!(control.is_muted());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!control.is_muted());
    }

    #[test]
    fn test_nested_guards() {
        let control = Arc::new(ListenControl::new(Duration::ZERO));

        let outer = SpeakingGuard::new(Arc::clone(&control));
        let inner = SpeakingGuard::new(Arc::clone(&control));
        drop(inner);
        assert!(control.is_muted());
        drop(outer);
        assert!(!control.is_muted());
    }

    #[test]
    fn test_unbalanced_end_is_ignored() {
        let control = ListenControl::new(Duration::ZERO);
        control.end_speaking();
        assert!(!control.is_muted());
    }

    #[test]
    fn test_pause_wins_over_mute() {
        let control = ListenControl::new(Duration::ZERO);
        control.begin_speaking();
        control.pause();
        assert_eq!(control.gate(), Gate::Paused);
    }
}
