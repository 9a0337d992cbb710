//! Signal/wait handoff between the listening pipeline and blocking callers
//!
//! Each slot behaves like a counting semaphore that carries a value: every
//! `signal` is latched until exactly one `wait` consumes it, in FIFO order.
//! Two utterances completing before the caller drains the first therefore
//! produce two wake-ups, not one.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::Utterance;

/// Single-producer/single-consumer signal carrying a value
#[derive(Debug)]
pub struct HandoffSlot<T> {
    pending: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffSlot<T> {
    /// Create an empty slot
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Latch a value and wake one waiter
    pub fn signal(&self, value: T) {
        self.lock().push_back(value);
        self.ready.notify_one();
    }

    /// Block until a value is available, then consume it
    pub fn wait(&self) -> T {
        let mut pending = self.lock();
        loop {
            if let Some(value) = pending.pop_front() {
                return value;
            }
            pending = self
                .ready
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; `None` if nothing was signaled
    ///
    /// A timeout too large to express as a deadline waits indefinitely.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut pending = self.lock();
        loop {
            if let Some(value) = pending.pop_front() {
                return Some(value);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            pending = self
                .ready
                .wait_timeout(pending, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Consume a latched value without blocking
    pub fn try_take(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Number of signals not yet consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The three independent handoff slots of the listening pipeline
#[derive(Debug, Default)]
pub struct HandoffChannels {
    /// Wake word detected; carries the spotted text
    pub wake_word: HandoffSlot<String>,

    /// Utterance segmented; carries the captured audio
    pub utterance: HandoffSlot<Utterance>,

    /// Utterance transcribed; carries the transcript
    pub transcript: HandoffSlot<String>,
}

impl HandoffChannels {
    /// Create empty channels
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_before_wait_is_latched() {
        let slot = HandoffSlot::new();
        slot.signal("hello".to_string());
        assert_eq!(slot.pending(), 1);
        assert_eq!(slot.wait(), "hello");
        assert_eq!(slot.pending(), 0);
    }

    #[test]
    fn test_signals_queue_in_order() {
        let slot = HandoffSlot::new();
        slot.signal(1);
        slot.signal(2);
        slot.signal(3);

        assert_eq!(slot.wait(), 1);
        assert_eq!(slot.wait(), 2);
        assert_eq!(slot.try_take(), Some(3));
        assert_eq!(slot.try_take(), None);
    }

    #[test]
    fn test_each_signal_consumed_once() {
        let slot = HandoffSlot::new();
        slot.signal(7);
        assert_eq!(slot.wait_timeout(Duration::from_millis(10)), Some(7));
        assert_eq!(slot.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_wakes_on_signal_from_other_thread() {
        let slot = Arc::new(HandoffSlot::new());
        let producer = Arc::clone(&slot);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal("ok".to_string());
        });

        assert_eq!(slot.wait(), "ok");
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_timeout_waits() {
        let slot = HandoffSlot::new();
        slot.signal(1);
        assert_eq!(slot.wait_timeout(Duration::MAX), Some(1));

        let slot = Arc::new(HandoffSlot::new());
        let producer = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.signal(2);
        });

        assert_eq!(slot.wait_timeout(Duration::MAX), Some(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let slot: HandoffSlot<()> = HandoffSlot::new();
        let started = Instant::now();
        assert!(slot.wait_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
