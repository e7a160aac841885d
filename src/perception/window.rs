//! Sliding Landmark Windows
//!
//! Fixed-capacity FIFO of landmark frames fed to one decision stage. Pushing
//! drops the oldest frame and appends the newest in constant time; the window
//! can never hold more than its capacity.

use super::frame::LandmarkFrame;
use std::collections::VecDeque;

/// Fixed-capacity sliding history of landmark frames
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    frames: VecDeque<LandmarkFrame>,
    capacity: usize,
}

impl SequenceWindow {
    /// Create an empty window
    ///
    /// # Panics
    /// Panics if capacity is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Window capacity must be non-zero");
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Shift in a new frame, evicting the oldest once full
    #[inline]
    pub fn update(&mut self, frame: LandmarkFrame) -> &Self {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self
    }

    /// Capacity of the window
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently held
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frame has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Check if the window has reached capacity
    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    /// Held frames, oldest first
    pub fn frames(&self) -> impl ExactSizeIterator<Item = &LandmarkFrame> + '_ {
        self.frames.iter()
    }

    /// Newest frame, if any
    pub fn latest(&self) -> Option<&LandmarkFrame> {
        self.frames.back()
    }

    /// Exactly `capacity` frames for inference, oldest first.
    ///
    /// Until the window has filled, the missing history is represented by
    /// leading zero frames.
    pub fn padded(&self) -> impl Iterator<Item = LandmarkFrame> + '_ {
        let missing = self.capacity - self.frames.len();
        std::iter::repeat(LandmarkFrame::zeros())
            .take(missing)
            .chain(self.frames.iter().copied())
    }

    /// Forget every frame
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
