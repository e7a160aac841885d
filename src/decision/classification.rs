//! Classification Ensemble
//!
//! Runs only when the segmentation decider fires. Every classification model
//! scores the classification window; the averaged posterior's arg-max is
//! the sub-assembly label.

use super::ensemble::{argmax, average_distributions};
use crate::inference::InferenceBackend;
use crate::perception::window::SequenceWindow;
use crate::{Error, Result};
use tracing::debug;

/// Averages per-model posteriors into one label
#[derive(Debug, Clone, Default)]
pub struct ClassificationEnsemble {
    expected_classes: Option<usize>,
}

impl ClassificationEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject distributions that do not cover exactly `classes` labels
    pub fn with_classes(classes: usize) -> Self {
        Self {
            expected_classes: Some(classes),
        }
    }

    /// Classify the window
    pub fn classify<B: InferenceBackend + ?Sized>(
        &self,
        backend: &mut B,
        window: &SequenceWindow,
    ) -> Result<usize> {
        let distributions = backend.classify(window)?;
        let averaged = average_distributions(&distributions)?;

        if let Some(expected) = self.expected_classes {
            if averaged.len() != expected {
                return Err(Error::Inference(format!(
                    "classifier produced {} classes, expected {}",
                    averaged.len(),
                    expected
                )));
            }
        }

        let label = argmax(&averaged)
            .ok_or_else(|| Error::Inference("empty class distribution".to_string()))?;
        debug!(label, posterior = ?averaged, "Classification result");
        Ok(label)
    }
}
