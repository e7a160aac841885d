//! Linear Ensemble Backend
//!
//! File-loaded ensemble of linear models over temporally pooled windows.
//! Each model averages the (zero-padded) window over time into one
//! 126-value feature vector and applies `W·x + b`:
//!
//! - segmentation models have one output, squashed with a sigmoid
//! - classification models have one output per class, passed through softmax
//!
//! Model files are JSON `{"weights": [[...126], ...], "bias": [...]}` named
//! `model_*.json`, one collection directory per stage.

use super::InferenceBackend;
use crate::perception::frame::FRAME_LEN;
use crate::perception::window::SequenceWindow;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One linear model: `outputs × FRAME_LEN` weights and one bias per output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearModel {
    /// Create a model, checking its shape
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        let model = Self { weights, bias };
        model.validate()?;
        Ok(model)
    }

    /// Model whose every output is the constant `bias`
    pub fn constant(bias: Vec<f32>) -> Self {
        Self {
            weights: vec![vec![0.0; FRAME_LEN]; bias.len()],
            bias,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bias.is_empty() {
            return Err(Error::Inference("model has no outputs".to_string()));
        }
        if self.weights.len() != self.bias.len() {
            return Err(Error::Inference(format!(
                "model has {} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(row) = self.weights.iter().find(|row| row.len() != FRAME_LEN) {
            return Err(Error::Inference(format!(
                "weight row has {} values, expected {}",
                row.len(),
                FRAME_LEN
            )));
        }
        Ok(())
    }

    /// Number of outputs
    pub fn outputs(&self) -> usize {
        self.bias.len()
    }

    /// Load one model file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Inference(format!("cannot read {}: {}", path.display(), e)))?;
        let model: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Inference(format!("cannot parse {}: {}", path.display(), e)))?;
        model
            .validate()
            .map_err(|e| Error::Inference(format!("{}: {}", path.display(), e)))?;
        Ok(model)
    }

    /// Save as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Raw outputs for one pooled feature vector
    fn logits(&self, features: &[f32; FRAME_LEN]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                row.iter()
                    .zip(features.iter())
                    .map(|(w, x)| w * x)
                    .sum::<f32>()
                    + bias
            })
            .collect()
    }
}

/// Temporal average of the zero-padded window
fn pool(window: &SequenceWindow) -> [f32; FRAME_LEN] {
    let mut features = [0.0f32; FRAME_LEN];
    for frame in window.padded() {
        for (acc, value) in features.iter_mut().zip(frame.values().iter()) {
            *acc += value;
        }
    }
    let steps = window.capacity() as f32;
    for value in features.iter_mut() {
        *value /= steps;
    }
    features
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Load every `model_*.json` in a directory, sorted by file name
pub fn load_collection(dir: &Path) -> Result<Vec<LinearModel>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Inference(format!("cannot read model directory {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("model_") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::Inference(format!(
            "no model_*.json files in {}",
            dir.display()
        )));
    }

    paths
        .iter()
        .map(|path| {
            debug!(path = %path.display(), "Loading model");
            LinearModel::load(path)
        })
        .collect()
}

/// Ensemble of linear segmentation and classification models
#[derive(Debug, Clone)]
pub struct LinearEnsembleBackend {
    segmentation: Vec<LinearModel>,
    classification: Vec<LinearModel>,
}

impl LinearEnsembleBackend {
    /// Build from in-memory models.
    ///
    /// Segmentation models must have exactly one output; classification
    /// models must agree on the number of classes.
    pub fn new(segmentation: Vec<LinearModel>, classification: Vec<LinearModel>) -> Result<Self> {
        if segmentation.is_empty() || classification.is_empty() {
            return Err(Error::Inference(
                "both model collections must be non-empty".to_string(),
            ));
        }
        if let Some(model) = segmentation.iter().find(|m| m.outputs() != 1) {
            return Err(Error::Inference(format!(
                "segmentation model has {} outputs, expected 1",
                model.outputs()
            )));
        }
        let classes = classification[0].outputs();
        if classification.iter().any(|m| m.outputs() != classes) {
            return Err(Error::Inference(
                "classification models disagree on the number of classes".to_string(),
            ));
        }

        Ok(Self {
            segmentation,
            classification,
        })
    }

    /// Load both collections from disk
    pub fn load(segmentation_dir: &Path, classification_dir: &Path) -> Result<Self> {
        let segmentation = load_collection(segmentation_dir)?;
        let classification = load_collection(classification_dir)?;
        let backend = Self::new(segmentation, classification)?;

        info!(
            segmentation_models = backend.segmentation.len(),
            classification_models = backend.classification.len(),
            classes = backend.classes(),
            "Models loaded"
        );
        Ok(backend)
    }

    /// Number of classes the classification models predict
    pub fn classes(&self) -> usize {
        self.classification[0].outputs()
    }
}

impl InferenceBackend for LinearEnsembleBackend {
    fn segment(&mut self, window: &SequenceWindow) -> Result<Vec<f32>> {
        let features = pool(window);
        Ok(self
            .segmentation
            .iter()
            .map(|model| sigmoid(model.logits(&features)[0]))
            .collect())
    }

    fn classify(&mut self, window: &SequenceWindow) -> Result<Vec<Vec<f32>>> {
        let features = pool(window);
        Ok(self
            .classification
            .iter()
            .map(|model| softmax(&model.logits(&features)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::frame::LandmarkFrame;
    use tempfile::TempDir;

    fn full_window(value: f32, capacity: usize) -> SequenceWindow {
        let mut window = SequenceWindow::new(capacity);
        for _ in 0..capacity {
            window.update(LandmarkFrame::filled(value));
        }
        window
    }

    #[test]
    fn test_pool_averages_padded_window() {
        let mut window = SequenceWindow::new(4);
        window.update(LandmarkFrame::filled(1.0));
        window.update(LandmarkFrame::filled(1.0));
        let features = pool(&window);
        assert!(features.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_segment_uses_weights() {
        // Single weight on the first value: static iff pooled x0 is large
        let mut weights = vec![0.0; FRAME_LEN];
        weights[0] = 10.0;
        let segmentation = LinearModel::new(vec![weights], vec![-5.0]).unwrap();
        let classification = LinearModel::constant(vec![0.0, 1.0]);
        let mut backend = LinearEnsembleBackend::new(vec![segmentation], vec![classification]).unwrap();

        let high = backend.segment(&full_window(1.0, 3)).unwrap();
        let low = backend.segment(&full_window(0.0, 3)).unwrap();
        assert!(high[0] > 0.99);
        assert!(low[0] < 0.01);
    }

    #[test]
    fn test_classify_returns_distribution_per_model() {
        let mut backend = LinearEnsembleBackend::new(
            vec![LinearModel::constant(vec![0.0])],
            vec![
                LinearModel::constant(vec![0.0, 3.0, 0.0]),
                LinearModel::constant(vec![3.0, 0.0, 0.0]),
            ],
        )
        .unwrap();

        let distributions = backend.classify(&full_window(0.5, 2)).unwrap();
        assert_eq!(distributions.len(), 2);
        assert!(distributions.iter().all(|d| d.len() == 3));
        assert_eq!(backend.classes(), 3);
    }

    #[test]
    fn test_backend_rejects_bad_shapes() {
        let seg = LinearModel::constant(vec![0.0]);
        let cls = LinearModel::constant(vec![0.0, 1.0]);

        assert!(LinearEnsembleBackend::new(vec![], vec![cls.clone()]).is_err());
        assert!(LinearEnsembleBackend::new(vec![cls.clone()], vec![cls.clone()]).is_err());
        assert!(LinearEnsembleBackend::new(
            vec![seg.clone()],
            vec![cls, LinearModel::constant(vec![0.0, 1.0, 2.0])]
        )
        .is_err());
        assert!(LinearModel::new(vec![vec![0.0; 3]], vec![0.0]).is_err());
    }

    #[test]
    fn test_load_collection() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let seg_dir = temp_dir.path().join("segmentation");
        let cls_dir = temp_dir.path().join("classification");
        std::fs::create_dir_all(&seg_dir).unwrap();
        std::fs::create_dir_all(&cls_dir).unwrap();

        LinearModel::constant(vec![2.0]).save(&seg_dir.join("model_0.json")).unwrap();
        LinearModel::constant(vec![-2.0]).save(&seg_dir.join("model_1.json")).unwrap();
        std::fs::write(seg_dir.join("notes.txt"), "ignored").unwrap();
        LinearModel::constant(vec![0.0, 1.0]).save(&cls_dir.join("model_0.json")).unwrap();

        let backend = LinearEnsembleBackend::load(&seg_dir, &cls_dir).unwrap();
        assert_eq!(backend.segmentation.len(), 2);
        assert_eq!(backend.classification.len(), 1);
        assert_eq!(backend.segmentation[0].bias, vec![2.0]);
    }

    #[test]
    fn test_load_fails_fast() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let empty = temp_dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert!(load_collection(&empty).is_err());
        assert!(load_collection(&temp_dir.path().join("missing")).is_err());

        std::fs::write(empty.join("model_0.json"), "{broken").unwrap();
        assert!(matches!(load_collection(&empty), Err(Error::Inference(_))));
    }
}
