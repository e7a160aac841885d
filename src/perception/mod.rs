//! Perception Layer
//!
//! From recorded or live hand detections to handover labels:
//!
//! - [`frame`]: landmark frames and calibration
//! - [`hands`]: left/right slot assignment
//! - [`source`]: the perception-service seam and bundled sources
//! - [`channel`]: bounded drop-on-full frame channel
//! - [`window`]: sliding frame windows
//! - [`pipeline`]: gating, readiness and decisions per frame

pub mod channel;
pub mod frame;
pub mod hands;
pub mod pipeline;
pub mod source;
pub mod window;

pub use channel::{frame_channel, FrameConsumer, FrameProducer};
pub use frame::{Calibration, LandmarkFrame};
pub use pipeline::{PerceptionPipeline, PipelineSettings};
pub use source::PerceptionSource;
pub use window::SequenceWindow;
