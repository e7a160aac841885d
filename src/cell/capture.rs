//! Capture Unit
//!
//! Polls the perception service, keeps one frame in every `skip_frames + 1`
//! and pushes it into the frame channel. A full channel drops the frame with
//! a warning; the unit never blocks on the consumer.
//!
//! The unit owns the producer end. Returning from [`CaptureUnit::run`] drops
//! it, which tells the perception unit no more frames are coming.

use super::context::CellContext;
use super::heartbeat::Throttle;
use crate::app::config::Config;
use crate::perception::channel::FrameProducer;
use crate::perception::source::PerceptionSource;
use crate::Result;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capture tuning
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Source frames skipped between two sampled frames
    pub skip_frames: u32,
    /// Pause after every source frame; zero for live sources
    pub frame_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            skip_frames: config.perception.skip_frames,
            frame_interval: Duration::from_millis(config.perception.replay_frame_interval_ms),
            heartbeat_interval: Duration::from_millis(config.perception.heartbeat_interval_ms),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters for one capture run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames pulled from the source, sampled or not
    pub frames_read: u64,
    /// Sampled frames accepted by the channel
    pub frames_sent: u64,
    /// Sampled frames lost to a full channel
    pub frames_dropped: u64,
}

/// Source-side worker
pub struct CaptureUnit<S: PerceptionSource> {
    source: S,
    settings: CaptureSettings,
    stats: CaptureStats,
}

impl<S: PerceptionSource> CaptureUnit<S> {
    pub fn new(source: S, settings: CaptureSettings) -> Self {
        Self {
            source,
            settings,
            stats: CaptureStats::default(),
        }
    }

    /// Whether the frame at `count` (frames since the last sample) is sampled
    fn is_sampled(&self, count: u32) -> bool {
        count >= self.settings.skip_frames
    }

    fn pace(&self, ctx: &CellContext) {
        if !self.settings.frame_interval.is_zero() {
            ctx.stop
                .sleep(self.settings.frame_interval, self.settings.frame_interval);
        }
    }

    /// Capture until the stop signal is raised or the source runs dry.
    ///
    /// Source errors raise the stop signal. The source is closed and the
    /// producer dropped on every path.
    pub fn run(&mut self, mut producer: FrameProducer, ctx: &CellContext) -> Result<CaptureStats> {
        info!(skip_frames = self.settings.skip_frames, "Camera started");
        let mut heartbeat = Throttle::new(self.settings.heartbeat_interval);
        let mut since_sample: u32 = 0;

        let outcome = loop {
            if ctx.stop.is_raised() {
                break Ok(());
            }

            if !self.is_sampled(since_sample) {
                match self.source.skip_frame() {
                    Ok(true) => {
                        self.stats.frames_read += 1;
                        since_sample += 1;
                        self.pace(ctx);
                        continue;
                    }
                    Ok(false) => {
                        info!("Frame source exhausted");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            }
            since_sample = 0;

            match self.source.next_frame_vector() {
                Ok(Some(frame)) => {
                    self.stats.frames_read += 1;
                    if producer.push(frame) {
                        self.stats.frames_sent += 1;
                    } else {
                        self.stats.frames_dropped += 1;
                        warn!("Frame channel full, dropping frame");
                    }
                }
                Ok(None) => {
                    info!("Frame source exhausted");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }

            if heartbeat.ready() {
                info!(frames = self.stats.frames_sent, "Camera running...");
            }
            self.pace(ctx);
        };

        self.source.close();
        drop(producer);
        debug!(
            read = self.stats.frames_read,
            sent = self.stats.frames_sent,
            dropped = self.stats.frames_dropped,
            "Capture counters"
        );

        match outcome {
            Ok(()) => {
                info!("Camera stopped");
                Ok(self.stats)
            }
            Err(e) => {
                error!("Camera failed: {}", e);
                ctx.stop.raise();
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }
}
