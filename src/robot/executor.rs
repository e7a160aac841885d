//! Task Executor
//!
//! Runs one task's operations, in order, against the robot link. After each
//! primitive the executor pauses for the operation's delay; wait-flagged
//! operations then ask the operator whether to go on. A "stop" answer
//! abandons the remaining operations.
//!
//! There is no mid-operation cancellation: the smallest interruptible unit
//! is one operation.

use super::link::RobotLink;
use crate::tasks::model::{Operation, OperationKind};
use crate::tasks::TaskRegistry;
use crate::{Error, Result};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Asks the operator whether to continue after a wait-flagged operation
pub trait OperatorPrompt: Send {
    /// True to continue, false to stop
    fn confirm_continue(&mut self, task: &str, operation: usize) -> Result<bool>;
}

/// Y/N prompt on a terminal. Only an explicit "n" stops.
pub struct ConsolePrompt<R: BufRead + Send, W: Write + Send> {
    input: R,
    output: W,
}

impl ConsolePrompt<std::io::BufReader<std::io::Stdin>, std::io::Stdout> {
    /// Prompt on stdin/stdout
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead + Send, W: Write + Send> OperatorPrompt for ConsolePrompt<R, W> {
    fn confirm_continue(&mut self, task: &str, operation: usize) -> Result<bool> {
        write!(
            self.output,
            "[{} #{}] Ready to continue? (Y) - Continue, (N) - Stop: ",
            task, operation
        )?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(!answer.trim().eq_ignore_ascii_case("n"))
    }
}

/// Answers from a fixed script, then always continues
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: std::collections::VecDeque<bool>,
    asked: usize,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: 0,
        }
    }

    /// Number of times the operator was asked
    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn confirm_continue(&mut self, _task: &str, _operation: usize) -> Result<bool> {
        self.asked += 1;
        Ok(self.answers.pop_front().unwrap_or(true))
    }
}

/// Executes tasks from a registry on one robot link
pub struct TaskExecutor<L: RobotLink, P: OperatorPrompt> {
    registry: TaskRegistry,
    link: L,
    prompt: P,
}

impl<L: RobotLink, P: OperatorPrompt> TaskExecutor<L, P> {
    pub fn new(registry: TaskRegistry, link: L, prompt: P) -> Self {
        Self {
            registry,
            link,
            prompt,
        }
    }

    /// Make sure the in-memory copy of a task is the one to run.
    ///
    /// Loads the task if only its record exists, and reloads it when the
    /// record no longer matches. A task that was never saved runs as it is.
    pub fn ensure_loaded(&mut self, name: &str) -> Result<()> {
        if !self.registry.exists_task(name) {
            self.registry.load_task(name)?;
        } else if self.registry.exists_task_file(name) && !self.registry.is_task_up_to_date(name)? {
            warn!(task = name, "Task differs from its record, reloading");
            self.registry.load_task(name)?;
        }
        Ok(())
    }

    /// Run a task to completion.
    ///
    /// Returns false if the operator chose to stop at a wait point; the
    /// remaining operations are skipped. Link errors abort the task.
    pub fn run_task(&mut self, name: &str) -> Result<bool> {
        self.ensure_loaded(name)?;
        let task = self.registry.get_task(name)?;
        let task_name = task.name.clone();
        let operations: Vec<Operation> = task.operations.clone();

        info!(task = %task_name, operations = operations.len(), "Running task");
        for (index, operation) in operations.iter().enumerate() {
            let delay = Duration::try_from_secs_f64(operation.delay_s).map_err(|e| {
                Error::InvalidReference(format!(
                    "operation {} of task {} has delay {}: {}",
                    index, task_name, operation.delay_s, e
                ))
            })?;
            self.execute(name, index, operation)?;

            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            if operation.wait && !self.prompt.confirm_continue(&task_name, index)? {
                warn!(task = %task_name, operation = index, "Operator stopped the task");
                return Ok(false);
            }
        }
        info!(task = %task_name, "Task finished");
        Ok(true)
    }

    fn execute(&mut self, task: &str, index: usize, operation: &Operation) -> Result<()> {
        debug!(task, index, kind = operation.kind.label(), "Operation");
        match &operation.kind {
            OperationKind::MoveLine { position, velocity } => {
                let target = self.registry.get_position(task, position)?.cartesian;
                self.link.move_line(&target, *velocity)
            }
            OperationKind::HandGuide { tool } => {
                let tool = self.registry.get_tool(tool)?;
                let (weight, centre_of_mass) = (tool.weight, tool.centre_of_mass);
                self.link.hand_guide(weight, &centre_of_mass)
            }
            OperationKind::OpenGripper => self.link.open_gripper(),
            OperationKind::CloseGripper => self.link.close_gripper(),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.registry
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
