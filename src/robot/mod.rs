//! Robot Side
//!
//! The robot link abstraction, the task executor that drives it and the
//! dispatch loop that turns classification labels into tasks.

pub mod dispatch;
pub mod executor;
pub mod link;

pub use dispatch::{DispatchSettings, DispatchState, RemainingTasks, RobotDispatchLoop};
pub use executor::{ConsolePrompt, OperatorPrompt, ScriptedPrompt, TaskExecutor};
pub use link::{CommandLog, RobotCommand, RobotLink, SimulatedRobotLink};
