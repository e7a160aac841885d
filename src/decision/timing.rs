//! Timing Window
//!
//! Fixed-size FIFO of segmentation samples (0 = moving, 1 = static) split at
//! the midpoint into an older left half and a newer right half. Both half
//! sums are maintained incrementally so each push is O(1).
//!
//! While filling, positions `1..=W/2` count towards the left sum and the
//! rest towards the right sum. Once full, a push moves the sample crossing
//! the midpoint from right to left, drops the evicted sample from the left,
//! and adds the new sample to the right.
//!
//! A transition (moving then static) fires when
//! `right_sum - left_sum > threshold * (W / 2)` on a full window.

use std::collections::VecDeque;

/// Segmentation sample history with running half sums
#[derive(Debug, Clone)]
pub struct TimingWindow {
    samples: VecDeque<u8>,
    size: usize,
    half: usize,
    left_sum: u32,
    right_sum: u32,
    threshold: f32,
}

impl TimingWindow {
    /// Create an empty window
    ///
    /// # Panics
    /// Panics if `size` is below 2
    pub fn new(size: usize, threshold: f32) -> Self {
        assert!(size >= 2, "Timing window must hold at least two samples");
        Self {
            samples: VecDeque::with_capacity(size),
            size,
            half: size / 2,
            left_sum: 0,
            right_sum: 0,
            threshold,
        }
    }

    /// Append a sample and report whether a transition fired.
    ///
    /// The window keeps its contents after firing; callers reset it.
    pub fn push(&mut self, is_static: bool) -> bool {
        let sample = u8::from(is_static);

        if self.samples.len() < self.size {
            self.samples.push_back(sample);
            if self.samples.len() <= self.half {
                self.left_sum += u32::from(sample);
            } else {
                self.right_sum += u32::from(sample);
            }
        } else {
            let crossing = u32::from(self.samples[self.half]);
            self.right_sum -= crossing;
            self.left_sum += crossing;
            if let Some(evicted) = self.samples.pop_front() {
                self.left_sum -= u32::from(evicted);
            }
            self.right_sum += u32::from(sample);
            self.samples.push_back(sample);
        }

        self.is_full() && self.transition_detected()
    }

    fn transition_detected(&self) -> bool {
        let margin = self.right_sum as f32 - self.left_sum as f32;
        margin > self.threshold * self.half as f32
    }

    /// Forget every sample and zero both sums
    pub fn reset(&mut self) {
        self.samples.clear();
        self.left_sum = 0;
        self.right_sum = 0;
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.size
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Window size W
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current (left, right) half sums
    pub fn sums(&self) -> (u32, u32) {
        (self.left_sum, self.right_sum)
    }
}
