//! Segmentation Decider
//!
//! Detects the moment the operator's hands go from moving to static. Each
//! accepted frame yields one segmentation sample (ensemble mean thresholded
//! at the sample threshold); samples feed a [`TimingWindow`], and a
//! transition fires the classification ensemble.

use super::classification::ClassificationEnsemble;
use super::ensemble::mean;
use super::timing::TimingWindow;
use crate::inference::InferenceBackend;
use crate::perception::window::SequenceWindow;
use crate::Result;
use tracing::{debug, info};

/// Default probability above which a sample counts as static
pub const DEFAULT_SAMPLE_THRESHOLD: f32 = 0.5;

/// Segmentation ensemble plus timing rule
#[derive(Debug, Clone)]
pub struct SegmentationDecider {
    timing: TimingWindow,
    sample_threshold: f32,
}

impl SegmentationDecider {
    /// Create a decider with timing window size `timing_window` and transition
    /// threshold `timing_threshold`
    pub fn new(timing_window: usize, timing_threshold: f32) -> Self {
        Self {
            timing: TimingWindow::new(timing_window, timing_threshold),
            sample_threshold: DEFAULT_SAMPLE_THRESHOLD,
        }
    }

    /// Override the per-sample threshold
    pub fn with_sample_threshold(mut self, threshold: f32) -> Self {
        self.sample_threshold = threshold;
        self
    }

    /// One segmentation sample: true when the ensemble says "static"
    pub fn step<B: InferenceBackend + ?Sized>(
        &self,
        backend: &mut B,
        window: &SequenceWindow,
    ) -> Result<bool> {
        let probabilities = backend.segment(window)?;
        let averaged = mean(&probabilities)?;
        let is_static = averaged > self.sample_threshold;
        debug!(probability = averaged, is_static, "Segmentation result");
        Ok(is_static)
    }

    /// Feed a sample into the timing window; true if a transition fired.
    ///
    /// A fired transition resets the timing window.
    pub fn observe(&mut self, is_static: bool) -> bool {
        let fired = self.timing.push(is_static);
        if fired {
            self.timing.reset();
        }
        fired
    }

    /// Segment, time and, on a transition, classify.
    ///
    /// Returns the label of the sub-assembly just handed over, if any.
    pub fn decide<B: InferenceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        segmentation_window: &SequenceWindow,
        classifier: &ClassificationEnsemble,
        classification_window: &SequenceWindow,
    ) -> Result<Option<usize>> {
        let is_static = self.step(backend, segmentation_window)?;
        if !self.observe(is_static) {
            return Ok(None);
        }

        info!("Transition detected");
        classifier.classify(backend, classification_window).map(Some)
    }

    /// Drop all timing history
    pub fn reset(&mut self) {
        self.timing.reset();
    }

    /// Timing window state, for inspection
    pub fn timing(&self) -> &TimingWindow {
        &self.timing
    }
}
