//! Task Data Model
//!
//! A task is an ordered list of robot operations plus the named positions
//! those operations move to. Tools live in a separate catalog shared by all
//! tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current task record format version
pub const CURRENT_FORMAT_VERSION: &str = "1.0";

/// Default linear velocity for move-line operations (mm/s)
pub const DEFAULT_VELOCITY: f64 = 5.0;

/// Default pause after an operation (s)
pub const DEFAULT_DELAY_S: f64 = 1.0;

/// Longest pause an operation may ask for (s)
pub const MAX_DELAY_S: f64 = 600.0;

/// Cartesian pose `[x, y, z, a, b, c]` in mm and rad
pub type CartesianPose = [f64; 6];

/// Joint pose of a 7-axis arm, in rad
pub type JointPose = [f64; 7];

/// A named robot pose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub cartesian: CartesianPose,
    pub joints: JointPose,
}

/// What an operation does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationKind {
    /// Linear move to a position of the same task
    MoveLine { position: String, velocity: f64 },
    /// Hand-guiding with a tool from the catalog
    HandGuide { tool: String },
    OpenGripper,
    CloseGripper,
}

impl OperationKind {
    /// Short label for logs and listings
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::MoveLine { .. } => "move-line",
            OperationKind::HandGuide { .. } => "hand-guide",
            OperationKind::OpenGripper => "open-gripper",
            OperationKind::CloseGripper => "close-gripper",
        }
    }
}

/// One step of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Pause after the primitive completes (s)
    #[serde(default = "default_delay")]
    pub delay_s: f64,
    /// Ask the operator before continuing
    #[serde(default)]
    pub wait: bool,
}

fn default_delay() -> f64 {
    DEFAULT_DELAY_S
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            delay_s: DEFAULT_DELAY_S,
            wait: false,
        }
    }

    pub fn move_line(position: impl Into<String>, velocity: f64) -> Self {
        Self::new(OperationKind::MoveLine {
            position: position.into(),
            velocity,
        })
    }

    pub fn hand_guide(tool: impl Into<String>) -> Self {
        Self::new(OperationKind::HandGuide { tool: tool.into() })
    }

    pub fn open_gripper() -> Self {
        Self::new(OperationKind::OpenGripper)
    }

    pub fn close_gripper() -> Self {
        Self::new(OperationKind::CloseGripper)
    }

    pub fn with_delay(mut self, delay_s: f64) -> Self {
        self.delay_s = delay_s;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// A tool that can be mounted for hand-guiding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    /// Weight (N)
    pub weight: f64,
    /// Centre of mass `[x, y, z]` (mm)
    pub centre_of_mass: [f64; 3],
}

/// Record metadata, not part of task equality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    pub saved_at: Option<DateTime<Utc>>,
    pub format_version: String,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            saved_at: None,
            format_version: CURRENT_FORMAT_VERSION.to_string(),
        }
    }
}

/// A robot task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Display name
    pub name: String,
    /// Storage key
    pub key: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
    /// Positions by key
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Task {
    /// Empty task; `name` and `key` must already be validated
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            metadata: TaskMetadata::default(),
            positions: BTreeMap::new(),
            operations: Vec::new(),
        }
    }

    /// Structural equality, ignoring record metadata
    pub fn same_content(&self, other: &Task) -> bool {
        self.name == other.name
            && self.key == other.key
            && self.positions == other.positions
            && self.operations == other.operations
    }

    /// Indices of operations that move to `position`
    pub fn operations_referencing(&self, position: &str) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter_map(|(i, op)| match &op.kind {
                OperationKind::MoveLine { position: p, .. } if p == position => Some(i),
                _ => None,
            })
            .collect()
    }
}
