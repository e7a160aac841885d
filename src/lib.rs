//! # Cobot Cell
//!
//! Controller for a human-robot collaborative assembly cell. A hand-gesture
//! perception pipeline detects when the operator has finished handing over a
//! sub-assembly, classifies which sub-assembly it was, and drives an
//! industrial arm through the matching predefined task.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cobot_cell::app::config::Config;
//! use cobot_cell::tasks::TaskRegistry;
//!
//! let config = Config::load_default().expect("config");
//! let mut registry = TaskRegistry::open(&config.robot.tasks_dir, &config.robot.tools_file)
//!     .expect("task registry");
//!
//! for name in registry.task_names() {
//!     println!("{}", name);
//! }
//! # let _ = registry.load_all_tasks();
//! ```
//!
//! ## Architecture
//!
//! - [`perception`]: landmark frames, sliding windows, the frame channel and
//!   the perception pipeline
//! - [`decision`]: timing window, segmentation decider and classification
//!   ensemble
//! - [`inference`]: the inference backend seam and a file-loaded linear backend
//! - [`tasks`]: task, position, operation and tool persistence
//! - [`robot`]: robot-link seam, task executor and dispatch loop
//! - [`cell`]: shared signals, worker units and the orchestrator
//! - [`app`]: CLI and configuration management
//!
//! ## Unit Layout
//!
//! ```text
//! ┌─────────────┐  frames   ┌─────────────┐  labels   ┌─────────────┐
//! │   Capture   │──(ring)──▶│ Perception  │──(chan)──▶│   Robot     │
//! │    unit     │  bounded  │  pipeline   │ unbounded │  dispatch   │
//! └─────────────┘           └─────────────┘           └─────────────┘
//!        │                     ▲    │ sets                  │ clears
//!        │                     │    ▼                       ▼
//!        └──── stop signal ────┴── motion flag ◀────────────┘
//! ```

pub mod app;
pub mod cell;
pub mod decision;
pub mod inference;
pub mod perception;
pub mod robot;
pub mod tasks;

// Re-export commonly used types
pub use cell::context::CellContext;
pub use cell::orchestrator::ProcessOrchestrator;
pub use perception::frame::LandmarkFrame;
pub use perception::window::SequenceWindow;
pub use robot::dispatch::RobotDispatchLoop;
pub use robot::executor::TaskExecutor;
pub use tasks::TaskRegistry;

/// Result type alias for the cell controller
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cell controller
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Robot transport error: {0}")]
    Transport(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must bring the whole cell down.
    ///
    /// Name and reference problems are caller-facing and recoverable; anything
    /// touching the robot, the inference backend or the dispatch bookkeeping
    /// is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidName(_) | Error::InvalidReference(_) | Error::NotFound(_)
        )
    }
}
