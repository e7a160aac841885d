//! Task Registry
//!
//! In-memory view over the persisted tasks and tool catalog. All mutations
//! of tasks, positions, operations and tools go through the registry, which
//! validates names and cross-references:
//!
//! - a move-line operation must reference a position of its own task
//! - a hand-guide operation must reference a tool in the catalog
//! - a position or tool still referenced by an operation cannot be deleted
//!
//! Tasks are loaded lazily. A task can exist only on disk (`FileOnly`), in
//! memory and matching its record (`UpToDate`), or in memory with unsaved
//! changes (`Stale`).

use super::model::{Operation, OperationKind, Position, Task, Tool, MAX_DELAY_S};
use super::names::{decode_key, validate_name, ValidName};
use super::store::{self, TaskStore};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a task currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// In memory and identical to its record
    UpToDate,
    /// In memory with changes not yet saved, or never saved
    Stale,
    /// Only on disk; must be loaded before use
    FileOnly,
    /// Neither in memory nor on disk
    Missing,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::UpToDate => "up to date",
            TaskState::Stale => "unsaved changes",
            TaskState::FileOnly => "not loaded",
            TaskState::Missing => "missing",
        };
        f.write_str(label)
    }
}

fn require_name(raw: &str) -> Result<ValidName> {
    validate_name(raw).ok_or_else(|| {
        Error::InvalidName(format!(
            "{:?} must contain characters other than spaces and underscores",
            raw
        ))
    })
}

/// Tasks, positions, operations and tools
#[derive(Debug)]
pub struct TaskRegistry {
    store: TaskStore,
    tools_file: PathBuf,
    tasks: BTreeMap<String, Task>,
    tools: BTreeMap<String, Tool>,
}

impl TaskRegistry {
    /// Open the task directory and load the tool catalog
    pub fn open(tasks_dir: &Path, tools_file: &Path) -> Result<Self> {
        let tools = store::load_tools(tools_file)?
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect::<BTreeMap<_, _>>();
        debug!(tools = tools.len(), dir = %tasks_dir.display(), "Task registry opened");

        Ok(Self {
            store: TaskStore::new(tasks_dir),
            tools_file: tools_file.to_path_buf(),
            tasks: BTreeMap::new(),
            tools,
        })
    }

    // ---- tasks ----

    /// Create an empty task. Returns its display name.
    pub fn add_task(&mut self, name: &str) -> Result<String> {
        let name = require_name(name)?;
        if self.tasks.contains_key(&name.key) || self.store.exists(&name.key) {
            return Err(Error::InvalidName(format!("task {} already exists", name.display)));
        }
        self.tasks
            .insert(name.key.clone(), Task::new(name.display.clone(), name.key));
        Ok(name.display)
    }

    /// Load (or reload) a task from its record. Returns its display name.
    ///
    /// Every operation is checked the same way as when it was added; a record
    /// with a dangling reference is refused and the in-memory copy, if any,
    /// is kept.
    pub fn load_task(&mut self, name: &str) -> Result<String> {
        let name = require_name(name)?;
        let mut task = self.store.load(&name.key)?;
        let checked = task
            .operations
            .iter()
            .cloned()
            .map(|operation| self.checked_operation(&task, operation))
            .collect::<Result<Vec<_>>>()?;
        task.operations = checked;

        let task_name = task.name.clone();
        self.tasks.insert(name.key, task);
        debug!(task = %task_name, "Task loaded");
        Ok(task_name)
    }

    /// Load every task record in the task directory
    pub fn load_all_tasks(&mut self) -> Result<Vec<String>> {
        let keys = self.store.list_keys()?;
        let loaded = keys
            .iter()
            .map(|key| self.load_task(key))
            .collect::<Result<Vec<_>>>()?;
        info!(count = loaded.len(), "Tasks loaded");
        Ok(loaded)
    }

    /// Forget a task, optionally deleting its record too
    pub fn delete_task(&mut self, name: &str, delete_file: bool) -> Result<()> {
        let name = require_name(name)?;
        let in_memory = self.tasks.remove(&name.key).is_some();
        let on_disk = self.store.exists(&name.key);

        if !in_memory && !(delete_file && on_disk) {
            return Err(Error::NotFound(format!("task {}", name.display)));
        }
        if delete_file {
            self.store.delete(&name.key)?;
        }
        Ok(())
    }

    /// Persist the in-memory copy of a task
    pub fn save_task(&mut self, name: &str) -> Result<()> {
        let key = self.loaded_key(name)?;
        let task = self
            .tasks
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("task {}", name)))?;
        let record = self.store.save(task)?;
        task.metadata = record.metadata;
        Ok(())
    }

    /// In-memory task
    pub fn get_task(&self, name: &str) -> Result<&Task> {
        let key = self.loaded_key(name)?;
        self.tasks
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("task {}", name)))
    }

    fn task_mut(&mut self, name: &str) -> Result<&mut Task> {
        let key = self.loaded_key(name)?;
        self.tasks
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("task {}", name)))
    }

    /// Key of a task that must already be in memory
    fn loaded_key(&self, name: &str) -> Result<String> {
        let name = require_name(name)?;
        if self.tasks.contains_key(&name.key) {
            Ok(name.key)
        } else if self.store.exists(&name.key) {
            Err(Error::NotFound(format!(
                "task {} exists on disk but is not loaded",
                name.display
            )))
        } else {
            Err(Error::NotFound(format!("task {}", name.display)))
        }
    }

    /// Display names of the in-memory tasks
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.values().map(|t| t.name.clone()).collect()
    }

    /// Display names of every task record on disk
    pub fn stored_task_names(&self) -> Result<Vec<String>> {
        Ok(self.store.list_keys()?.iter().map(|k| decode_key(k)).collect())
    }

    /// Whether the task is in memory
    pub fn exists_task(&self, name: &str) -> bool {
        validate_name(name)
            .map(|n| self.tasks.contains_key(&n.key))
            .unwrap_or(false)
    }

    /// Whether the task has a record on disk
    pub fn exists_task_file(&self, name: &str) -> bool {
        validate_name(name)
            .map(|n| self.store.exists(&n.key))
            .unwrap_or(false)
    }

    /// Whether the in-memory task matches its record
    pub fn is_task_up_to_date(&self, name: &str) -> Result<bool> {
        let task = self.get_task(name)?;
        if !self.store.exists(&task.key) {
            return Ok(false);
        }
        let record = self.store.load(&task.key)?;
        Ok(task.same_content(&record))
    }

    pub fn task_state(&self, name: &str) -> Result<TaskState> {
        if self.exists_task(name) {
            return Ok(if self.is_task_up_to_date(name)? {
                TaskState::UpToDate
            } else {
                TaskState::Stale
            });
        }
        Ok(if self.exists_task_file(name) {
            TaskState::FileOnly
        } else {
            TaskState::Missing
        })
    }

    // ---- operations ----

    /// Check an operation's references against a task and the tool catalog,
    /// normalizing its position reference to a key
    fn checked_operation(&self, task: &Task, mut operation: Operation) -> Result<Operation> {
        match &mut operation.kind {
            OperationKind::MoveLine { position, velocity } => {
                let key = validate_name(position).map(|n| n.key).ok_or_else(|| {
                    Error::InvalidReference(format!("invalid position name {:?}", position))
                })?;
                if !task.positions.contains_key(&key) {
                    return Err(Error::InvalidReference(format!(
                        "task {} has no position {}",
                        task.name,
                        decode_key(&key)
                    )));
                }
                if !(*velocity > 0.0 && velocity.is_finite()) {
                    return Err(Error::InvalidReference(format!(
                        "move-line velocity must be positive, got {}",
                        velocity
                    )));
                }
                *position = key;
            }
            OperationKind::HandGuide { tool } => {
                if !self.tools.contains_key(tool.as_str()) {
                    return Err(Error::InvalidReference(format!("unknown tool {}", tool)));
                }
            }
            OperationKind::OpenGripper | OperationKind::CloseGripper => {}
        }
        if !(0.0..=MAX_DELAY_S).contains(&operation.delay_s) {
            return Err(Error::InvalidReference(format!(
                "operation delay must be between 0 and {} s, got {}",
                MAX_DELAY_S, operation.delay_s
            )));
        }
        Ok(operation)
    }

    /// Append an operation. Returns its index.
    pub fn add_operation(&mut self, task_name: &str, operation: Operation) -> Result<usize> {
        let operation = self.checked_operation(self.get_task(task_name)?, operation)?;
        let task = self.task_mut(task_name)?;
        task.operations.push(operation);
        Ok(task.operations.len() - 1)
    }

    /// Replace the operation at `index`
    pub fn update_operation(
        &mut self,
        task_name: &str,
        index: usize,
        operation: Operation,
    ) -> Result<()> {
        let operation = self.checked_operation(self.get_task(task_name)?, operation)?;
        let task = self.task_mut(task_name)?;
        let slot = task
            .operations
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("operation {} of task {}", index, task.name)))?;
        *slot = operation;
        Ok(())
    }

    /// Remove and return the operation at `index`
    pub fn delete_operation(&mut self, task_name: &str, index: usize) -> Result<Operation> {
        let task = self.task_mut(task_name)?;
        if index >= task.operations.len() {
            return Err(Error::NotFound(format!(
                "operation {} of task {}",
                index, task.name
            )));
        }
        Ok(task.operations.remove(index))
    }

    pub fn get_operation(&self, task_name: &str, index: usize) -> Result<&Operation> {
        let task = self.get_task(task_name)?;
        task.operations
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("operation {} of task {}", index, task.name)))
    }

    // ---- positions ----

    /// Add a named position. Returns its display name.
    pub fn add_position(
        &mut self,
        task_name: &str,
        position_name: &str,
        position: Position,
    ) -> Result<String> {
        let name = require_name(position_name)?;
        let task = self.task_mut(task_name)?;
        if task.positions.contains_key(&name.key) {
            return Err(Error::InvalidName(format!(
                "task {} already has position {}",
                task.name, name.display
            )));
        }
        task.positions.insert(name.key, position);
        Ok(name.display)
    }

    pub fn update_position(
        &mut self,
        task_name: &str,
        position_name: &str,
        position: Position,
    ) -> Result<()> {
        let name = require_name(position_name)?;
        let task = self.task_mut(task_name)?;
        let slot = task.positions.get_mut(&name.key).ok_or_else(|| {
            Error::InvalidReference(format!("task {} has no position {}", task.name, name.display))
        })?;
        *slot = position;
        Ok(())
    }

    /// Remove a position no operation references
    pub fn delete_position(&mut self, task_name: &str, position_name: &str) -> Result<Position> {
        let name = require_name(position_name)?;
        let task = self.task_mut(task_name)?;
        let users = task.operations_referencing(&name.key);
        if !users.is_empty() {
            return Err(Error::InvalidReference(format!(
                "position {} is used by operations {:?}",
                name.display, users
            )));
        }
        task.positions.remove(&name.key).ok_or_else(|| {
            Error::InvalidReference(format!("task {} has no position {}", task.name, name.display))
        })
    }

    pub fn get_position(&self, task_name: &str, position_name: &str) -> Result<&Position> {
        let name = require_name(position_name)?;
        let task = self.get_task(task_name)?;
        task.positions.get(&name.key).ok_or_else(|| {
            Error::InvalidReference(format!("task {} has no position {}", task.name, name.display))
        })
    }

    /// Display names of a task's positions
    pub fn position_names(&self, task_name: &str) -> Result<Vec<String>> {
        Ok(self
            .get_task(task_name)?
            .positions
            .keys()
            .map(|k| decode_key(k))
            .collect())
    }

    // ---- tools ----

    pub fn add_tool(&mut self, tool: Tool) -> Result<()> {
        let name = tool.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidName("tool name must not be empty".to_string()));
        }
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidName(format!("tool {} already exists", name)));
        }
        self.tools.insert(name.clone(), Tool { name, ..tool });
        Ok(())
    }

    pub fn update_tool(&mut self, tool: Tool) -> Result<()> {
        let slot = self
            .tools
            .get_mut(tool.name.trim())
            .ok_or_else(|| Error::NotFound(format!("tool {}", tool.name)))?;
        slot.weight = tool.weight;
        slot.centre_of_mass = tool.centre_of_mass;
        Ok(())
    }

    /// Remove a tool no in-memory operation references
    pub fn delete_tool(&mut self, name: &str) -> Result<Tool> {
        let in_use = self.tasks.values().find(|task| {
            task.operations
                .iter()
                .any(|op| matches!(&op.kind, OperationKind::HandGuide { tool } if tool == name))
        });
        if let Some(task) = in_use {
            return Err(Error::InvalidReference(format!(
                "tool {} is used by task {}",
                name, task.name
            )));
        }
        self.tools
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("tool {}", name)))
    }

    /// Tool referenced by an operation
    pub fn get_tool(&self, name: &str) -> Result<&Tool> {
        self.tools
            .get(name)
            .ok_or_else(|| Error::InvalidReference(format!("unknown tool {}", name)))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Persist the tool catalog
    pub fn save_tools(&self) -> Result<()> {
        let tools: Vec<Tool> = self.tools.values().cloned().collect();
        store::save_tools(&self.tools_file, &tools)
    }
}
