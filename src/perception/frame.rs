//! Landmark Frames and Calibration
//!
//! A landmark frame holds the x/y/z coordinates of 42 hand keypoints (21 per
//! hand, left hand first) for one sampled camera frame. Values are stored
//! axis-major: all x values, then all y values, then all z values.
//!
//! A hand whose landmarks are all zero has not been detected yet.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of coordinate axes per landmark
pub const AXES: usize = 3;

/// Number of landmarks per hand
pub const LANDMARKS_PER_HAND: usize = 21;

/// Number of landmarks per frame (two hands)
pub const LANDMARKS: usize = LANDMARKS_PER_HAND * 2;

/// Total scalar values in a frame
pub const FRAME_LEN: usize = AXES * LANDMARKS;

/// A hand whose coordinate sum is below this is treated as absent
pub const HAND_PRESENCE_EPSILON: f32 = 1e-3;

/// Landmarks of a single hand as detected, one `[x, y, z]` per keypoint
pub type HandLandmarks = [[f32; AXES]; LANDMARKS_PER_HAND];

/// Which hand slot of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    /// Landmark index range of this hand inside a frame
    fn landmarks(self) -> std::ops::Range<usize> {
        match self {
            Hand::Left => 0..LANDMARKS_PER_HAND,
            Hand::Right => LANDMARKS_PER_HAND..LANDMARKS,
        }
    }
}

/// One sampled frame of hand landmarks
#[derive(Clone, Copy, PartialEq)]
pub struct LandmarkFrame {
    values: [f32; FRAME_LEN],
}

impl std::fmt::Debug for LandmarkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandmarkFrame")
            .field("left_sum", &self.hand_sum(Hand::Left))
            .field("right_sum", &self.hand_sum(Hand::Right))
            .finish()
    }
}

impl Default for LandmarkFrame {
    fn default() -> Self {
        Self::zeros()
    }
}

impl LandmarkFrame {
    /// Frame with no hands detected
    pub const fn zeros() -> Self {
        Self {
            values: [0.0; FRAME_LEN],
        }
    }

    /// Frame with every value set to `value`
    pub const fn filled(value: f32) -> Self {
        Self {
            values: [value; FRAME_LEN],
        }
    }

    /// Build a frame from axis-major values. Returns `None` on a length mismatch.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let values: [f32; FRAME_LEN] = values.try_into().ok()?;
        Some(Self { values })
    }

    /// Build a frame from the two hand slots
    pub fn from_hands(left: &HandLandmarks, right: &HandLandmarks) -> Self {
        let mut frame = Self::zeros();
        for (offset, hand) in [(0, left), (LANDMARKS_PER_HAND, right)] {
            for (i, point) in hand.iter().enumerate() {
                for (axis, value) in point.iter().enumerate() {
                    frame.set(axis, offset + i, *value);
                }
            }
        }
        frame
    }

    #[inline]
    fn index(axis: usize, landmark: usize) -> usize {
        debug_assert!(axis < AXES && landmark < LANDMARKS);
        axis * LANDMARKS + landmark
    }

    /// Value of one coordinate
    #[inline]
    pub fn get(&self, axis: usize, landmark: usize) -> f32 {
        self.values[Self::index(axis, landmark)]
    }

    /// Overwrite one coordinate
    #[inline]
    pub fn set(&mut self, axis: usize, landmark: usize, value: f32) {
        self.values[Self::index(axis, landmark)] = value;
    }

    /// Raw axis-major values
    pub fn values(&self) -> &[f32; FRAME_LEN] {
        &self.values
    }

    /// Sum of every coordinate of one hand
    pub fn hand_sum(&self, hand: Hand) -> f32 {
        let mut sum = 0.0;
        for axis in 0..AXES {
            for landmark in hand.landmarks() {
                sum += self.get(axis, landmark);
            }
        }
        sum
    }

    /// Whether a hand has been detected in this frame
    pub fn has_hand(&self, hand: Hand) -> bool {
        self.hand_sum(hand) >= HAND_PRESENCE_EPSILON
    }

    /// Whether both hands are present
    pub fn has_both_hands(&self) -> bool {
        self.has_hand(Hand::Left) && self.has_hand(Hand::Right)
    }

    /// Sum of the three axes of one landmark
    fn landmark_sum(&self, landmark: usize) -> f32 {
        (0..AXES).map(|axis| self.get(axis, landmark)).sum()
    }
}

/// On-disk calibration artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationFile {
    min: Vec<f32>,
    max: Vec<f32>,
}

/// Per-axis min/max normalization vectors
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    min: [f32; FRAME_LEN],
    max: [f32; FRAME_LEN],
}

impl Calibration {
    /// Create a calibration; every `max` must exceed its `min`.
    pub fn new(min: &[f32], max: &[f32]) -> crate::Result<Self> {
        let min: [f32; FRAME_LEN] = min.try_into().map_err(|_| {
            crate::Error::Config(format!(
                "calibration min vector has {} values, expected {}",
                min.len(),
                FRAME_LEN
            ))
        })?;
        let max: [f32; FRAME_LEN] = max.try_into().map_err(|_| {
            crate::Error::Config(format!(
                "calibration max vector has {} values, expected {}",
                max.len(),
                FRAME_LEN
            ))
        })?;

        if let Some(i) = (0..FRAME_LEN).find(|&i| max[i] <= min[i]) {
            return Err(crate::Error::Config(format!(
                "calibration range is empty at index {}: min {} >= max {}",
                i, min[i], max[i]
            )));
        }

        Ok(Self { min, max })
    }

    /// Identity calibration over the unit cube
    pub fn unit() -> Self {
        Self {
            min: [0.0; FRAME_LEN],
            max: [1.0; FRAME_LEN],
        }
    }

    /// Load both vectors from a JSON file with `min` and `max` arrays
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CalibrationFile = serde_json::from_str(&content)?;
        Self::new(&file.min, &file.max)
    }

    /// Save both vectors as JSON
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let file = CalibrationFile {
            min: self.min.to_vec(),
            max: self.max.to_vec(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Normalize detected landmarks into `[0, 1]`, clipping out-of-range values.
    ///
    /// Landmarks that were not detected (all axes zero) stay zero so the
    /// "hand not yet detected" sentinel survives normalization.
    pub fn normalize(&self, frame: &LandmarkFrame) -> LandmarkFrame {
        let mut out = *frame;
        for landmark in 0..LANDMARKS {
            if frame.landmark_sum(landmark) <= HAND_PRESENCE_EPSILON {
                continue;
            }
            for axis in 0..AXES {
                let i = LandmarkFrame::index(axis, landmark);
                let scaled = (frame.values[i] - self.min[i]) / (self.max[i] - self.min[i]);
                out.values[i] = scaled.clamp(0.0, 1.0);
            }
        }
        out
    }

    /// Map normalized values back into calibration space
    pub fn denormalize(&self, frame: &LandmarkFrame) -> LandmarkFrame {
        let mut out = *frame;
        for i in 0..FRAME_LEN {
            out.values[i] = frame.values[i] * (self.max[i] - self.min[i]) + self.min[i];
        }
        out
    }
}
