//! Robot Tasks
//!
//! Data model, name validation, persistence and the registry that ties them
//! together.

pub mod model;
pub mod names;
pub mod registry;
pub mod store;

pub use model::{Operation, OperationKind, Position, Task, Tool};
pub use registry::{TaskRegistry, TaskState};
