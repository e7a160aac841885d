//! Process Orchestrator
//!
//! Wires the three worker units together and supervises them:
//!
//! ```text
//! capture ──frame channel (bounded, drop on full)──▶ perception
//! perception ──result channel (unbounded)──▶ robot dispatch
//! ```
//!
//! All units share one [`CellContext`]. Any unit failing raises the stop
//! signal, which winds the others down. When the frame source runs dry the
//! shutdown cascades instead: capture drops its producer, perception drains
//! the channel and drops the result sender, and the dispatch loop finishes
//! the queued labels before disconnecting.

use super::capture::{CaptureSettings, CaptureStats, CaptureUnit};
use super::context::CellContext;
use super::panel::{Panel, PanelEvent, ONLINE_CHIME, READY_CHIME, SHUTDOWN_CHIME};
use crate::app::config::Config;
use crate::inference::InferenceBackend;
use crate::perception::channel::frame_channel;
use crate::perception::pipeline::{PerceptionPipeline, PipelineStats};
use crate::perception::source::PerceptionSource;
use crate::robot::dispatch::RobotDispatchLoop;
use crate::robot::executor::OperatorPrompt;
use crate::robot::link::RobotLink;
use crate::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use std::io::Write;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub frame_channel_capacity: usize,
    pub readiness_timeout: Duration,
    pub robot_online_timeout: Duration,
    pub poll_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_channel_capacity: config.perception.frame_channel_capacity,
            readiness_timeout: Duration::from_millis(config.perception.readiness_timeout_ms),
            robot_online_timeout: Duration::from_millis(config.robot.robot_online_timeout_ms),
            poll_interval: Duration::from_millis(config.perception.poll_interval_ms),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the units reported when they finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellReport {
    pub capture: CaptureStats,
    pub perception: PipelineStats,
}

/// Owns the shared context and starts cell runs
pub struct ProcessOrchestrator {
    settings: OrchestratorSettings,
    ctx: CellContext,
    run_id: Uuid,
    span: Span,
}

impl ProcessOrchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self::with_context(settings, CellContext::new())
    }

    /// Use an existing context, e.g. one whose stop signal a Ctrl+C handler
    /// already holds
    pub fn with_context(settings: OrchestratorSettings, ctx: CellContext) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("cell", run_id = %run_id);
        Self {
            settings,
            ctx,
            run_id,
            span,
        }
    }

    pub fn context(&self) -> &CellContext {
        &self.ctx
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Spawn the capture, perception and robot units.
    pub fn start<S, B, L, P>(
        &self,
        source: S,
        capture_settings: CaptureSettings,
        mut pipeline: PerceptionPipeline<B>,
        mut robot: RobotDispatchLoop<L, P>,
    ) -> Result<RunningCell>
    where
        S: PerceptionSource + 'static,
        B: InferenceBackend + 'static,
        L: RobotLink + 'static,
        P: OperatorPrompt + 'static,
    {
        let _entered = self.span.enter();
        info!("Starting cell");

        let (producer, mut consumer) = frame_channel(self.settings.frame_channel_capacity);
        let (results_tx, results_rx) = unbounded::<usize>();

        let robot = {
            let ctx = self.ctx.clone();
            let span = self.span.clone();
            thread::Builder::new().name("robot".to_string()).spawn(move || {
                let _entered = span.enter();
                robot.run(&results_rx, &ctx)
            })?
        };

        let perception = {
            let ctx = self.ctx.clone();
            let span = self.span.clone();
            thread::Builder::new()
                .name("perception".to_string())
                .spawn(move || {
                    let _entered = span.enter();
                    pipeline.run(&mut consumer, &results_tx, &ctx)
                })
        };
        let perception = match perception {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.stop.raise();
                let _ = robot.join();
                return Err(e.into());
            }
        };

        let capture = {
            let ctx = self.ctx.clone();
            let span = self.span.clone();
            thread::Builder::new().name("capture".to_string()).spawn(move || {
                let _entered = span.enter();
                CaptureUnit::new(source, capture_settings).run(producer, &ctx)
            })
        };
        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                self.ctx.stop.raise();
                let _ = perception.join();
                let _ = robot.join();
                return Err(e.into());
            }
        };

        Ok(RunningCell {
            ctx: self.ctx.clone(),
            span: self.span.clone(),
            settings: self.settings.clone(),
            capture,
            perception,
            robot,
        })
    }

    /// Start the units, report readiness and wait for them to finish
    pub fn run<S, B, L, P>(
        &self,
        source: S,
        capture_settings: CaptureSettings,
        pipeline: PerceptionPipeline<B>,
        robot: RobotDispatchLoop<L, P>,
    ) -> Result<CellReport>
    where
        S: PerceptionSource + 'static,
        B: InferenceBackend + 'static,
        L: RobotLink + 'static,
        P: OperatorPrompt + 'static,
    {
        let cell = self.start(source, capture_settings, pipeline, robot)?;
        if cell.wait_model_ready() {
            cell.wait_robot_online();
        }
        cell.join()
    }

    /// Drive the cell from the operator panel.
    ///
    /// `launch` runs on the first start press. A stop press, a closed panel
    /// or the stop signal ends supervision; so does the cell finishing on its
    /// own. The shutdown chime plays on every exit path.
    pub fn supervise<W, F>(
        &self,
        panel: &mut Panel<W>,
        events: &Receiver<PanelEvent>,
        launch: F,
    ) -> Result<Option<CellReport>>
    where
        W: Write,
        F: FnOnce(&ProcessOrchestrator) -> Result<RunningCell>,
    {
        let _entered = self.span.enter();
        let mut launch = Some(launch);
        let mut cell: Option<RunningCell> = None;

        let outcome = loop {
            if self.ctx.stop.is_raised() {
                break Ok(());
            }
            if cell.as_ref().map(RunningCell::is_finished).unwrap_or(false) {
                info!("Cell finished");
                break Ok(());
            }

            match events.recv_timeout(self.settings.poll_interval) {
                Ok(PanelEvent::Start) => match launch.take() {
                    Some(launch) => {
                        info!("START received, starting cell");
                        match launch(self) {
                            Ok(running) => {
                                announce(panel, &running);
                                cell = Some(running);
                            }
                            Err(e) => {
                                self.ctx.stop.raise();
                                break Err(e);
                            }
                        }
                    }
                    None => info!("START received, cell already started"),
                },
                Ok(PanelEvent::Stop) => {
                    info!("STOP received, shutting cell down");
                    self.ctx.stop.raise();
                    break Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Panel connection closed, shutting cell down");
                    self.ctx.stop.raise();
                    break Ok(());
                }
            }
        };

        let report = match (outcome, cell) {
            (Ok(()), Some(cell)) => cell.join().map(Some),
            (Ok(()), None) => Ok(None),
            (Err(e), _) => Err(e),
        };

        if let Err(e) = panel.chime(&SHUTDOWN_CHIME) {
            warn!("Shutdown chime failed: {}", e);
        }
        report
    }
}

/// Play the readiness chimes as the cell comes up
fn announce<W: Write>(panel: &mut Panel<W>, cell: &RunningCell) {
    if !cell.wait_model_ready() {
        return;
    }
    if let Err(e) = panel.chime(&READY_CHIME) {
        warn!("Ready chime failed: {}", e);
    }
    if cell.wait_robot_online() {
        if let Err(e) = panel.chime(&ONLINE_CHIME) {
            warn!("Online chime failed: {}", e);
        }
    }
}

/// Handles of a started cell
pub struct RunningCell {
    ctx: CellContext,
    span: Span,
    settings: OrchestratorSettings,
    capture: JoinHandle<Result<CaptureStats>>,
    perception: JoinHandle<Result<PipelineStats>>,
    robot: JoinHandle<Result<()>>,
}

impl RunningCell {
    /// Wait for the first complete frame. Logs and returns false on timeout.
    pub fn wait_model_ready(&self) -> bool {
        let ready = self.ctx.model_ready.wait_timeout(self.settings.readiness_timeout);
        if ready {
            info!("Model ready");
        } else {
            warn!("Model failed to signal readiness in time");
        }
        ready
    }

    /// Wait for the robot connection. Logs and returns false on timeout.
    pub fn wait_robot_online(&self) -> bool {
        let online = self
            .ctx
            .robot_online
            .wait_timeout(self.settings.robot_online_timeout);
        if online {
            info!("Robot online");
        } else {
            warn!("Robot failed to come online in time");
        }
        online
    }

    /// Whether every unit has returned
    pub fn is_finished(&self) -> bool {
        self.capture.is_finished() && self.perception.is_finished() && self.robot.is_finished()
    }

    pub fn context(&self) -> &CellContext {
        &self.ctx
    }

    /// Wait for every unit. Returns the first failure, if any.
    pub fn join(self) -> Result<CellReport> {
        let _entered = self.span.enter();
        let ctx = self.ctx;

        let robot = join_unit("robot", self.robot, &ctx);
        let perception = join_unit("perception", self.perception, &ctx);
        let capture = join_unit("capture", self.capture, &ctx);

        let report = CellReport {
            capture: capture?,
            perception: perception?,
        };
        robot?;

        info!(
            frames = report.capture.frames_sent,
            dropped = report.capture.frames_dropped,
            labels = report.perception.labels_sent,
            "Cell stopped"
        );
        Ok(report)
    }
}

/// Join a unit, turning a panic into a fatal error
fn join_unit<T>(name: &str, handle: JoinHandle<Result<T>>, ctx: &CellContext) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            error!(unit = name, "Unit panicked");
            ctx.stop.raise();
            Err(Error::InconsistentState(format!("{} unit panicked", name)))
        }
    }
}
