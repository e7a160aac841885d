//! Left/Right Hand Slot Assignment
//!
//! Hand detectors report an unordered list of hands per image. The decision
//! models expect a stable layout (left slot, right slot), so detections are
//! matched against the previous frame's slots:
//!
//! - no detection: both slots keep their previous landmarks
//! - one detection: it replaces the nearer slot, then the slots are ordered
//!   by horizontal centre
//! - two detections: ordered by horizontal centre
//! - more than two: each slot independently takes its nearest detection
//!
//! The left slot holds the hand with the larger image x centre (the camera
//! faces the operator).
//!
//! With more than two detections the per-slot matching is independent, so
//! both slots can end up holding the same detection.

use super::frame::{HandLandmarks, LandmarkFrame, AXES, LANDMARKS_PER_HAND};

/// Wrist landmark index
const WRIST: usize = 0;

/// Middle finger base landmark index
const MIDDLE_MCP: usize = 9;

const EMPTY_HAND: HandLandmarks = [[0.0; AXES]; LANDMARKS_PER_HAND];

fn squared_distance(a: &HandLandmarks, b: &HandLandmarks) -> f32 {
    a.iter()
        .zip(b.iter())
        .flat_map(|(p, q)| p.iter().zip(q.iter()).map(|(x, y)| (x - y) * (x - y)))
        .sum()
}

/// Horizontal centre, midpoint between wrist and middle finger base
fn centre_x(hand: &HandLandmarks) -> f32 {
    (hand[WRIST][0] + hand[MIDDLE_MCP][0]) / 2.0
}

/// Tracks which detected hand belongs in which frame slot
#[derive(Debug, Clone)]
pub struct HandAssigner {
    left: HandLandmarks,
    right: HandLandmarks,
}

impl Default for HandAssigner {
    fn default() -> Self {
        Self::new()
    }
}

impl HandAssigner {
    /// Create an assigner with both slots empty
    pub fn new() -> Self {
        Self {
            left: EMPTY_HAND,
            right: EMPTY_HAND,
        }
    }

    /// Forget the previous hands
    pub fn reset(&mut self) {
        self.left = EMPTY_HAND;
        self.right = EMPTY_HAND;
    }

    /// Assign this image's detections and return the resulting frame
    pub fn assign(&mut self, detections: &[HandLandmarks]) -> LandmarkFrame {
        match detections {
            [] => {}
            [hand] => {
                if squared_distance(hand, &self.left) < squared_distance(hand, &self.right) {
                    self.left = *hand;
                } else {
                    self.right = *hand;
                }
                if centre_x(&self.left) < centre_x(&self.right) {
                    std::mem::swap(&mut self.left, &mut self.right);
                }
            }
            [first, second] => {
                if centre_x(first) < centre_x(second) {
                    self.left = *second;
                    self.right = *first;
                } else {
                    self.left = *first;
                    self.right = *second;
                }
            }
            many => {
                let previous_left = self.left;
                let previous_right = self.right;
                let nearest = |target: &HandLandmarks| {
                    many.iter()
                        .min_by(|a, b| {
                            squared_distance(target, a)
                                .partial_cmp(&squared_distance(target, b))
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .copied()
                };
                if let Some(hand) = nearest(&previous_left) {
                    self.left = hand;
                }
                if let Some(hand) = nearest(&previous_right) {
                    self.right = hand;
                }
            }
        }

        LandmarkFrame::from_hands(&self.left, &self.right)
    }
}
