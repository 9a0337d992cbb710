//! Audio frames and the shared capture buffer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One fixed-size block of mono 16-bit PCM samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Box<[i16]>,
}

impl Frame {
    /// Wrap captured samples
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// The raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the frame carries no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i16>> for Frame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Bounded, time-ordered buffer of recently captured frames
///
/// Shared between the producer (append) and the consumer (drain). When full,
/// the oldest frames are dropped: for a live microphone feed recency matters
/// more than completeness.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a frame, dropping from the front while over capacity
    pub fn append(&self, frame: Frame) {
        let mut frames = self.lock();
        frames.push_back(frame);

        let excess = frames.len().saturating_sub(self.capacity);
        if excess > 0 {
            frames.drain(..excess);
            let total = self.dropped.fetch_add(excess as u64, Ordering::Relaxed) + excess as u64;
            tracing::trace!(dropped = excess, total, "frame buffer full, dropped oldest");
        }
    }

    /// Remove and return the first `n` frames
    ///
    /// Returns an empty vec when fewer than `n` frames are buffered; never
    /// returns a partial batch and never blocks.
    #[must_use]
    pub fn drain_front(&self, n: usize) -> Vec<Frame> {
        let mut frames = self.lock();
        if n == 0 || frames.len() < n {
            return Vec::new();
        }
        frames.drain(..n).collect()
    }

    /// Number of buffered frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no frames are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of buffered frames
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames discarded by the overflow policy
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything buffered
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> Frame {
        Frame::new(vec![tag; 4])
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let buffer = FrameBuffer::new(30);
        for i in 0..100 {
            buffer.append(frame(i));
            assert!(buffer.len() <= 30);
        }
        assert_eq!(buffer.len(), 30);
        assert_eq!(buffer.dropped(), 70);
    }

    #[test]
    fn test_drops_oldest() {
        let buffer = FrameBuffer::new(3);
        for i in 0..5 {
            buffer.append(frame(i));
        }

        let drained = buffer.drain_front(3);
        let tags: Vec<i16> = drained.iter().map(|f| f.samples()[0]).collect();
        assert_eq!(tags, vec![2, 3, 4]);
    }

    #[test]
    fn test_drain_is_all_or_nothing() {
        let buffer = FrameBuffer::new(10);
        buffer.append(frame(1));
        buffer.append(frame(2));
        buffer.append(frame(3));

        assert!(buffer.drain_front(4).is_empty());
        assert_eq!(buffer.len(), 3);

        buffer.append(frame(4));
        let drained = buffer.drain_front(4);
        assert_eq!(drained.len(), 4);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_preserves_capture_order() {
        let buffer = FrameBuffer::new(16);
        for i in 0..8 {
            buffer.append(frame(i));
        }

        let first: Vec<i16> = buffer.drain_front(4).iter().map(|f| f.samples()[0]).collect();
        let second: Vec<i16> = buffer.drain_front(4).iter().map(|f| f.samples()[0]).collect();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(second, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_drain_zero_is_empty() {
        let buffer = FrameBuffer::new(4);
        buffer.append(frame(1));
        assert!(buffer.drain_front(0).is_empty());
        assert_eq!(buffer.len(), 1);
    }
}
