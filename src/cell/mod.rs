//! Cell Runtime
//!
//! Shared signals, the capture unit, the operator panel and the orchestrator
//! that runs everything on worker threads.

pub mod capture;
pub mod context;
pub mod heartbeat;
pub mod orchestrator;
pub mod panel;

pub use capture::{CaptureSettings, CaptureStats, CaptureUnit};
pub use context::{CellContext, MotionFlag, ReadySignal, StopSignal};
pub use orchestrator::{CellReport, OrchestratorSettings, ProcessOrchestrator, RunningCell};
pub use panel::{Panel, PanelEvent, Tone};
