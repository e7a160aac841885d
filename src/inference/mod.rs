//! Inference Backends
//!
//! The decision stages never run a model directly. They hand a window to an
//! [`InferenceBackend`] and get back one output per ensemble member:
//!
//! - segmentation: one "static" probability per model
//! - classification: one posterior distribution per model
//!
//! Averaging and thresholding happen in [`crate::decision`], so backends stay
//! free of decision logic and stubs can drive tests deterministically.

pub mod linear;

use crate::perception::window::SequenceWindow;
use crate::Result;

pub use linear::LinearEnsembleBackend;

/// Ensemble model runner
pub trait InferenceBackend: Send {
    /// Probability that the hands are static, one value per segmentation model
    fn segment(&mut self, window: &SequenceWindow) -> Result<Vec<f32>>;

    /// Class posterior, one distribution per classification model
    fn classify(&mut self, window: &SequenceWindow) -> Result<Vec<Vec<f32>>>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn segment(&mut self, window: &SequenceWindow) -> Result<Vec<f32>> {
        (**self).segment(window)
    }

    fn classify(&mut self, window: &SequenceWindow) -> Result<Vec<Vec<f32>>> {
        (**self).classify(window)
    }
}
