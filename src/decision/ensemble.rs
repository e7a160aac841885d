//! Ensemble averaging helpers

use crate::{Error, Result};

/// Arithmetic mean of per-model probabilities
pub fn mean(values: &[f32]) -> Result<f32> {
    if values.is_empty() {
        return Err(Error::Inference("empty segmentation ensemble".to_string()));
    }
    Ok(values.iter().sum::<f32>() / values.len() as f32)
}

/// Element-wise mean of per-model distributions
pub fn average_distributions(distributions: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = distributions
        .first()
        .ok_or_else(|| Error::Inference("empty classification ensemble".to_string()))?;

    let classes = first.len();
    if classes == 0 {
        return Err(Error::Inference("empty class distribution".to_string()));
    }
    if let Some(other) = distributions.iter().find(|d| d.len() != classes) {
        return Err(Error::Inference(format!(
            "distribution lengths differ: {} vs {}",
            classes,
            other.len()
        )));
    }

    let count = distributions.len() as f32;
    let mut averaged = vec![0.0f32; classes];
    for distribution in distributions {
        for (acc, p) in averaged.iter_mut().zip(distribution) {
            *acc += p;
        }
    }
    for p in averaged.iter_mut() {
        *p /= count;
    }
    Ok(averaged)
}

/// Index of the largest value; ties resolve to the lowest index
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, top)) if v <= top => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
