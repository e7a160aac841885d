//! Decision Stages
//!
//! - [`timing`]: two-halves running-sum window over segmentation samples
//! - [`segmentation`]: per-frame "moving vs static" ensemble plus the timing rule
//! - [`classification`]: which sub-assembly was handed over
//! - [`ensemble`]: pure averaging helpers shared by both stages

pub mod classification;
pub mod ensemble;
pub mod segmentation;
pub mod timing;

pub use classification::ClassificationEnsemble;
pub use segmentation::SegmentationDecider;
pub use timing::TimingWindow;
