//! Energy-based voice activity detection
//!
//! Scores batches by RMS energy and compares them against a threshold that
//! tracks the ambient noise floor. The floor only adapts on quiet batches, so
//! speech never pollutes the estimate.

use std::collections::VecDeque;

use super::Frame;

/// RMS energy of a batch of frames, over the concatenated samples
///
/// Monotonic in loudness; a constant signal of amplitude `a` scores `a`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(batch: &[Frame]) -> f64 {
    let (sum_squares, count) = batch
        .iter()
        .flat_map(Frame::samples)
        .fold((0.0f64, 0usize), |(sum, n), &s| {
            let s = f64::from(s);
            (s.mul_add(s, sum), n + 1)
        });

    if count == 0 {
        return 0.0;
    }
    (sum_squares / count as f64).sqrt()
}

/// True if `energy` reaches `threshold`
#[must_use]
pub fn is_speech(energy: f64, threshold: f64) -> bool {
    energy >= threshold
}

/// Sliding window of recent quiet scores
///
/// `threshold = max(mean(window) * multiplier, floor)`. Until the first quiet
/// observation the threshold is infinite, so nothing counts as speech before
/// the room has been heard. The threshold never reaches zero: after pure
/// digital silence, silence must still score below it.
#[derive(Debug, Clone)]
pub struct NoiseFloorEstimator {
    window: VecDeque<f64>,
    window_size: usize,
    multiplier: f64,
    floor: f64,
    threshold: f64,
}

impl NoiseFloorEstimator {
    /// Create an estimator averaging `window_size` scores
    #[must_use]
    pub fn new(window_size: usize, multiplier: f64, floor: f64) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            multiplier,
            floor,
            threshold: f64::INFINITY,
        }
    }

    /// Push a quiet score, evicting the oldest once warmed up
    #[allow(clippy::cast_precision_loss)]
    pub fn observe(&mut self, energy: f64) -> f64 {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(energy);

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        self.threshold = (mean * self.multiplier)
            .max(self.floor)
            .max(f64::MIN_POSITIVE);
        self.threshold
    }

    /// Current speech threshold
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// True once the window holds `window_size` scores
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.window.len() == self.window_size
    }

    /// Number of scores currently in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True if no quiet score has been observed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
