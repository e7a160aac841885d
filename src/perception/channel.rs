//! Bounded Frame Channel
//!
//! Single-producer single-consumer queue carrying sampled landmark frames
//! from the capture unit to the perception pipeline.
//!
//! - Producer (capture thread): never blocks; a frame pushed into a full
//!   channel is dropped and counted
//! - Consumer (perception thread): polls, never sees a frame twice
//!
//! Built on `rtrb`, with shared statistics for monitoring.

use super::frame::LandmarkFrame;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default channel capacity in frames
pub const DEFAULT_CAPACITY: usize = 20;

/// A sampled frame tagged with its capture sequence number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedFrame {
    pub sequence: u64,
    pub frame: LandmarkFrame,
}

/// Channel statistics for monitoring
#[derive(Debug, Default)]
pub struct FrameChannelStats {
    /// Frames accepted by the channel
    pub frames_pushed: AtomicU64,
    /// Frames dropped because the channel was full
    pub frames_dropped: AtomicU64,
    /// Frames handed to the consumer
    pub frames_consumed: AtomicU64,
    /// Highest occupancy observed
    pub peak_occupancy: AtomicU64,
}

impl FrameChannelStats {
    fn record_occupancy(&self, occupied: u64) {
        self.peak_occupancy.fetch_max(occupied, Ordering::Relaxed);
    }
}

/// Create a channel and return its two halves
///
/// # Panics
/// Panics if capacity is zero
pub fn frame_channel(capacity: usize) -> (FrameProducer, FrameConsumer) {
    assert!(capacity > 0, "Frame channel capacity must be non-zero");

    let (producer, consumer) = RingBuffer::new(capacity);
    let stats = Arc::new(FrameChannelStats::default());

    (
        FrameProducer {
            inner: producer,
            sequence: 0,
            stats: Arc::clone(&stats),
            capacity,
        },
        FrameConsumer {
            inner: consumer,
            stats,
        },
    )
}

/// Producer half (capture thread)
pub struct FrameProducer {
    inner: Producer<CapturedFrame>,
    sequence: u64,
    stats: Arc<FrameChannelStats>,
    capacity: usize,
}

impl FrameProducer {
    /// Push a frame without blocking.
    ///
    /// Returns false if the channel was full and the frame was dropped. The
    /// sequence number only advances for accepted frames.
    #[inline]
    pub fn push(&mut self, frame: LandmarkFrame) -> bool {
        let captured = CapturedFrame {
            sequence: self.sequence,
            frame,
        };

        match self.inner.push(captured) {
            Ok(()) => {
                self.sequence += 1;
                self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
                let occupied = self.capacity - self.inner.slots();
                self.stats.record_occupancy(occupied as u64);
                true
            }
            Err(_) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Whether the next push would be dropped
    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// Whether the consumer half has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.inner.is_abandoned()
    }

    /// Shared statistics
    pub fn stats(&self) -> Arc<FrameChannelStats> {
        Arc::clone(&self.stats)
    }
}

/// Consumer half (perception thread)
pub struct FrameConsumer {
    inner: Consumer<CapturedFrame>,
    stats: Arc<FrameChannelStats>,
}

impl FrameConsumer {
    /// Pop the oldest frame, if any
    #[inline]
    pub fn pop(&mut self) -> Option<CapturedFrame> {
        let captured = self.inner.pop().ok()?;
        self.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
        Some(captured)
    }

    /// Pop up to `max_count` frames, oldest first
    pub fn pop_batch(&mut self, max_count: usize) -> Vec<CapturedFrame> {
        let mut batch = Vec::with_capacity(max_count.min(self.available()));
        while batch.len() < max_count {
            match self.pop() {
                Some(captured) => batch.push(captured),
                None => break,
            }
        }
        batch
    }

    /// Check if no frame is waiting
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of frames waiting
    #[inline]
    pub fn available(&self) -> usize {
        self.inner.slots()
    }

    /// Whether the producer half has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.inner.is_abandoned()
    }

    /// Shared statistics
    pub fn stats(&self) -> Arc<FrameChannelStats> {
        Arc::clone(&self.stats)
    }
}
