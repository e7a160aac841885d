//! Robot Dispatch Loop
//!
//! Consumes classification labels and runs the matching robot task. Each
//! class has a stack of task instances (`wheel1`, `wheel2`, ...) that only
//! ever shrinks. A label with nothing left, or a terminal class dispatched
//! before its paired class is down to its last instance, is an inconsistent
//! state: the cell stops before any motion is issued.
//!
//! The loop owns the robot link. It connects on start, announces
//! robot-online, preloads every task it may run and then waits for labels.
//! On every exit path the link is disconnected before the loop returns.

use super::executor::{OperatorPrompt, TaskExecutor};
use super::link::RobotLink;
use crate::app::config::{Config, DispatchConfig, GuardConfig};
use crate::cell::context::CellContext;
use crate::cell::heartbeat::Throttle;
use crate::{Error, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Where the loop is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    WaitingForResult,
    Executing,
    Shutdown,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchState::WaitingForResult => write!(f, "waiting for result"),
            DispatchState::Executing => write!(f, "executing"),
            DispatchState::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Per-label stacks of task instances still to run
#[derive(Debug, Clone, Default)]
pub struct RemainingTasks {
    stacks: BTreeMap<usize, Vec<String>>,
}

impl RemainingTasks {
    /// Build the stacks from the class table.
    ///
    /// A class with one instance runs its task as named; with `n` instances
    /// it runs `<task>1` through `<task>n`, in that order.
    pub fn from_config(dispatch: &DispatchConfig) -> Self {
        let stacks = dispatch
            .classes
            .iter()
            .map(|class| {
                let stack = if class.instances == 1 {
                    vec![class.task.clone()]
                } else {
                    (1..=class.instances)
                        .rev()
                        .map(|i| format!("{}{}", class.task, i))
                        .collect()
                };
                (class.label, stack)
            })
            .collect();
        Self { stacks }
    }

    /// Instances left for a label; None if the label is not configured
    pub fn remaining(&self, label: usize) -> Option<usize> {
        self.stacks.get(&label).map(Vec::len)
    }

    /// The instance the next dispatch of `label` would run
    pub fn peek(&self, label: usize) -> Option<&str> {
        self.stacks
            .get(&label)
            .and_then(|stack| stack.last())
            .map(String::as_str)
    }

    /// Take the next instance of a label
    pub fn pop(&mut self, label: usize) -> Result<String> {
        let stack = self.stacks.get_mut(&label).ok_or_else(|| {
            Error::InconsistentState(format!("label {} has no configured task", label))
        })?;
        stack.pop().ok_or_else(|| {
            Error::InconsistentState(format!(
                "label {} recognised more often than configured",
                label
            ))
        })
    }

    /// Every instance still queued, in label order
    pub fn all_instances(&self) -> Vec<String> {
        self.stacks.values().flatten().cloned().collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.stacks.values().all(Vec::is_empty)
    }
}

/// Dispatch loop timing and target
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub address: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            address: config.robot.address.clone(),
            poll_interval: Duration::from_millis(config.perception.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(config.perception.heartbeat_interval_ms),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Robot-side worker: labels in, tasks out
pub struct RobotDispatchLoop<L: RobotLink, P: OperatorPrompt> {
    executor: TaskExecutor<L, P>,
    remaining: RemainingTasks,
    guard: Option<GuardConfig>,
    settings: DispatchSettings,
    state: DispatchState,
}

impl<L: RobotLink, P: OperatorPrompt> RobotDispatchLoop<L, P> {
    pub fn new(
        executor: TaskExecutor<L, P>,
        dispatch: &DispatchConfig,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            executor,
            remaining: RemainingTasks::from_config(dispatch),
            guard: dispatch.guard.clone(),
            settings,
            state: DispatchState::WaitingForResult,
        }
    }

    /// Connect, announce robot-online and preload every queued task.
    ///
    /// On a preload failure the link is disconnected again.
    pub fn start(&mut self, ctx: &CellContext) -> Result<()> {
        self.executor.link_mut().connect(&self.settings.address)?;
        info!(address = %self.settings.address, "Robot connected");
        ctx.robot_online.set();

        for instance in self.remaining.all_instances() {
            if let Err(e) = self.executor.ensure_loaded(&instance) {
                error!(task = %instance, "Failed to preload task: {}", e);
                self.executor.link_mut().disconnect();
                return Err(e);
            }
        }
        info!(
            tasks = self.executor.registry().task_names().len(),
            "Robot tasks preloaded"
        );
        Ok(())
    }

    fn check_guard(&self, label: usize) -> Result<()> {
        let Some(guard) = &self.guard else {
            return Ok(());
        };
        if label != guard.terminal_label {
            return Ok(());
        }
        let paired_left = self.remaining.remaining(guard.paired_label).unwrap_or(0);
        if paired_left != 1 {
            return Err(Error::InconsistentState(format!(
                "label {} dispatched with {} instance(s) of label {} left, expected exactly 1",
                label, paired_left, guard.paired_label
            )));
        }
        Ok(())
    }

    /// Handle one label.
    ///
    /// Returns false if the operator stopped the task; the stop signal is
    /// raised in that case. Errors leave the robot untouched unless they came
    /// from the task itself.
    pub fn dispatch(&mut self, label: usize, ctx: &CellContext) -> Result<bool> {
        match self.remaining.remaining(label) {
            None => {
                return Err(Error::InconsistentState(format!(
                    "label {} has no configured task",
                    label
                )))
            }
            Some(0) => {
                return Err(Error::InconsistentState(format!(
                    "label {} recognised more often than configured",
                    label
                )))
            }
            Some(_) => {}
        }
        self.check_guard(label)?;

        let instance = self.remaining.pop(label)?;
        info!(label, task = %instance, "Dispatching task");

        self.state = DispatchState::Executing;
        let outcome = self.executor.run_task(&instance);
        ctx.motion.clear();
        self.state = DispatchState::WaitingForResult;

        if !outcome? {
            warn!(task = %instance, "Task stopped by operator, stopping cell");
            ctx.stop.raise();
            return Ok(false);
        }
        Ok(true)
    }

    fn serve(&mut self, results: &Receiver<usize>, ctx: &CellContext) -> Result<()> {
        let mut heartbeat = Throttle::new(self.settings.heartbeat_interval);
        loop {
            if ctx.stop.is_raised() {
                info!("Stop requested");
                return Ok(());
            }

            match results.recv_timeout(self.settings.poll_interval) {
                Ok(label) => {
                    if !self.dispatch(label, ctx)? {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Result channel closed");
                    return Ok(());
                }
            }

            if heartbeat.ready() {
                info!(state = %self.state, "Robot running...");
            }
        }
    }

    /// Run the loop until stop, a closed result channel or a fatal error.
    ///
    /// Fatal errors raise the stop signal. The link is disconnected on every
    /// path.
    pub fn run(&mut self, results: &Receiver<usize>, ctx: &CellContext) -> Result<()> {
        let outcome = self.start(ctx).and_then(|()| self.serve(results, ctx));
        self.shutdown();

        if let Err(e) = &outcome {
            error!("Robot dispatch failed: {}", e);
            ctx.stop.raise();
        }
        outcome
    }

    fn shutdown(&mut self) {
        self.state = DispatchState::Shutdown;
        if self.executor.link().is_connected() {
            self.executor.link_mut().disconnect();
            info!("Robot disconnected");
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn remaining(&self) -> &RemainingTasks {
        &self.remaining
    }

    pub fn executor(&self) -> &TaskExecutor<L, P> {
        &self.executor
    }
}

impl<L: RobotLink, P: OperatorPrompt> Drop for RobotDispatchLoop<L, P> {
    fn drop(&mut self) {
        if self.executor.link().is_connected() {
            self.executor.link_mut().disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ClassConfig;
    use crate::robot::executor::ScriptedPrompt;
    use crate::robot::link::{CommandLog, RobotCommand, SimulatedRobotLink};
    use crate::tasks::model::Operation;
    use crate::tasks::TaskRegistry;
    use crossbeam::channel::unbounded;
    use tempfile::TempDir;

    /// cover (label 0, terminal) and wheel (label 1, two instances)
    fn dispatch_config() -> DispatchConfig {
        DispatchConfig {
            classes: vec![
                ClassConfig {
                    label: 0,
                    task: "cover".to_string(),
                    instances: 1,
                },
                ClassConfig {
                    label: 1,
                    task: "wheel".to_string(),
                    instances: 2,
                },
            ],
            guard: Some(GuardConfig {
                terminal_label: 0,
                paired_label: 1,
            }),
        }
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            address: "127.0.0.1".to_string(),
            poll_interval: Duration::from_millis(1),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    fn saved_registry(temp_dir: &TempDir, tasks: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::open(
            &temp_dir.path().join("tasks"),
            &temp_dir.path().join("tools.json"),
        )
        .unwrap();
        for task in tasks {
            registry.add_task(task).unwrap();
            registry
                .add_operation(task, Operation::close_gripper().with_delay(0.0))
                .unwrap();
            registry.save_task(task).unwrap();
        }
        TaskRegistry::open(
            &temp_dir.path().join("tasks"),
            &temp_dir.path().join("tools.json"),
        )
        .unwrap()
    }

    fn dispatch_loop(
        temp_dir: &TempDir,
        link: SimulatedRobotLink,
        prompt: ScriptedPrompt,
    ) -> RobotDispatchLoop<SimulatedRobotLink, ScriptedPrompt> {
        let registry = saved_registry(temp_dir, &["cover", "wheel1", "wheel2"]);
        RobotDispatchLoop::new(
            TaskExecutor::new(registry, link, prompt),
            &dispatch_config(),
            settings(),
        )
    }

    fn started(temp_dir: &TempDir) -> (RobotDispatchLoop<SimulatedRobotLink, ScriptedPrompt>, CommandLog, CellContext) {
        let link = SimulatedRobotLink::new();
        let log = link.command_log();
        let ctx = CellContext::new();
        let mut robot = dispatch_loop(temp_dir, link, ScriptedPrompt::default());
        robot.start(&ctx).unwrap();
        (robot, log, ctx)
    }

    #[test]
    fn test_instance_order() {
        let mut remaining = RemainingTasks::from_config(&dispatch_config());
        assert_eq!(remaining.remaining(1), Some(2));
        assert_eq!(remaining.peek(1), Some("wheel1"));
        assert_eq!(remaining.pop(1).unwrap(), "wheel1");
        assert_eq!(remaining.pop(1).unwrap(), "wheel2");
        assert!(matches!(remaining.pop(1), Err(Error::InconsistentState(_))));
        assert_eq!(remaining.pop(0).unwrap(), "cover");
        assert!(remaining.is_exhausted());
        assert_eq!(remaining.remaining(7), None);
    }

    #[test]
    fn test_start_connects_and_preloads() {
        let temp_dir = TempDir::new().unwrap();
        let (robot, log, ctx) = started(&temp_dir);

        assert!(ctx.robot_online.is_set());
        assert!(robot.executor().link().is_connected());
        assert_eq!(robot.executor().registry().task_names().len(), 3);
        assert_eq!(log.snapshot(), vec![RobotCommand::Connect("127.0.0.1".to_string())]);
    }

    #[test]
    fn test_preload_failure_disconnects() {
        let temp_dir = TempDir::new().unwrap();
        let registry = saved_registry(&temp_dir, &["cover", "wheel1"]);
        let link = SimulatedRobotLink::new();
        let log = link.command_log();
        let mut robot = RobotDispatchLoop::new(
            TaskExecutor::new(registry, link, ScriptedPrompt::default()),
            &dispatch_config(),
            settings(),
        );

        let ctx = CellContext::new();
        assert!(matches!(robot.start(&ctx), Err(Error::NotFound(_))));
        assert!(!robot.executor().link().is_connected());
        assert_eq!(log.snapshot().last(), Some(&RobotCommand::Disconnect));
    }

    #[test]
    fn test_dispatch_runs_task_and_clears_motion() {
        let temp_dir = TempDir::new().unwrap();
        let (mut robot, log, ctx) = started(&temp_dir);

        ctx.motion.set();
        assert!(robot.dispatch(1, &ctx).unwrap());
        assert!(!ctx.motion.is_set());
        assert_eq!(robot.remaining().remaining(1), Some(1));
        assert_eq!(robot.state(), DispatchState::WaitingForResult);
        assert_eq!(log.primitives(), vec![RobotCommand::CloseGripper]);
    }

    #[test]
    fn test_extra_dispatch_is_inconsistent_without_motion() {
        let temp_dir = TempDir::new().unwrap();
        let (mut robot, log, ctx) = started(&temp_dir);

        robot.dispatch(1, &ctx).unwrap();
        robot.dispatch(1, &ctx).unwrap();
        let before = log.primitives().len();

        assert!(matches!(robot.dispatch(1, &ctx), Err(Error::InconsistentState(_))));
        assert_eq!(log.primitives().len(), before);
    }

    #[test]
    fn test_unknown_label_is_inconsistent() {
        let temp_dir = TempDir::new().unwrap();
        let (mut robot, log, ctx) = started(&temp_dir);
        assert!(matches!(robot.dispatch(9, &ctx), Err(Error::InconsistentState(_))));
        assert!(log.primitives().is_empty());
    }

    #[test]
    fn test_guard_blocks_terminal_class() {
        let temp_dir = TempDir::new().unwrap();
        let (mut robot, log, ctx) = started(&temp_dir);

        // both wheels left
        assert!(matches!(robot.dispatch(0, &ctx), Err(Error::InconsistentState(_))));
        assert!(log.primitives().is_empty());
        assert_eq!(robot.remaining().remaining(0), Some(1));

        // one wheel left
        robot.dispatch(1, &ctx).unwrap();
        assert!(robot.dispatch(0, &ctx).unwrap());
        assert_eq!(robot.remaining().remaining(0), Some(0));
    }

    #[test]
    fn test_guard_blocks_after_paired_class_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let (mut robot, log, ctx) = started(&temp_dir);

        robot.dispatch(1, &ctx).unwrap();
        robot.dispatch(1, &ctx).unwrap();
        let before = log.primitives().len();
        assert!(matches!(robot.dispatch(0, &ctx), Err(Error::InconsistentState(_))));
        assert_eq!(log.primitives().len(), before);
    }

    #[test]
    fn test_operator_stop_raises_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = saved_registry(&temp_dir, &["cover", "wheel1", "wheel2"]);
        registry.load_task("wheel1").unwrap();
        registry
            .update_operation("wheel1", 0, Operation::close_gripper().with_delay(0.0).with_wait(true))
            .unwrap();

        let ctx = CellContext::new();
        let mut robot = RobotDispatchLoop::new(
            TaskExecutor::new(registry, SimulatedRobotLink::new(), ScriptedPrompt::new([false])),
            &dispatch_config(),
            settings(),
        );
        robot.start(&ctx).unwrap();

        ctx.motion.set();
        assert!(!robot.dispatch(1, &ctx).unwrap());
        assert!(ctx.stop.is_raised());
        assert!(!ctx.motion.is_set());
    }

    #[test]
    fn test_run_drains_labels_and_disconnects() {
        let temp_dir = TempDir::new().unwrap();
        let link = SimulatedRobotLink::new();
        let log = link.command_log();
        let mut robot = dispatch_loop(&temp_dir, link, ScriptedPrompt::default());

        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        for label in [1, 0, 1] {
            tx.send(label).unwrap();
        }
        drop(tx);

        robot.run(&rx, &ctx).unwrap();
        assert_eq!(robot.state(), DispatchState::Shutdown);
        assert!(robot.remaining().is_exhausted());
        assert!(!ctx.stop.is_raised());
        assert_eq!(log.primitives().len(), 3);
        assert_eq!(log.snapshot().last(), Some(&RobotCommand::Disconnect));
    }

    #[test]
    fn test_run_fatal_error_raises_stop_and_disconnects() {
        let temp_dir = TempDir::new().unwrap();
        let link = SimulatedRobotLink::new();
        let log = link.command_log();
        let mut robot = dispatch_loop(&temp_dir, link, ScriptedPrompt::default());

        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        tx.send(0).unwrap();

        assert!(matches!(robot.run(&rx, &ctx), Err(Error::InconsistentState(_))));
        assert!(ctx.stop.is_raised());
        assert!(log.primitives().is_empty());
        assert!(!robot.executor().link().is_connected());
    }

    #[test]
    fn test_run_transport_error_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let link = SimulatedRobotLink::new().with_failure_after(0);
        let mut robot = dispatch_loop(&temp_dir, link, ScriptedPrompt::default());

        let ctx = CellContext::new();
        let (tx, rx) = unbounded();
        tx.send(1).unwrap();

        assert!(matches!(robot.run(&rx, &ctx), Err(Error::Transport(_))));
        assert!(ctx.stop.is_raised());
        assert!(!ctx.motion.is_set());
    }

    #[test]
    fn test_run_exits_on_stop() {
        let temp_dir = TempDir::new().unwrap();
        let link = SimulatedRobotLink::new();
        let log = link.command_log();
        let mut robot = dispatch_loop(&temp_dir, link, ScriptedPrompt::default());

        let ctx = CellContext::new();
        ctx.stop.raise();
        let (_tx, rx) = unbounded::<usize>();

        robot.run(&rx, &ctx).unwrap();
        assert!(log.primitives().is_empty());
        assert!(!robot.executor().link().is_connected());
    }
}
