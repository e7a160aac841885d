//! Task and Tool Persistence
//!
//! Tasks are stored one pretty-printed JSON record per task, named
//! `<key>.json`, inside the tasks directory. Records are written to a
//! `.json.tmp` sibling first and renamed into place so a crash never leaves
//! a truncated record.
//!
//! Tools are stored together in one catalog file.

use super::model::{Task, Tool, CURRENT_FORMAT_VERSION};
use crate::{Error, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Temporary sibling used while writing `final_path`
fn temp_path(final_path: &Path) -> PathBuf {
    final_path.with_extension("json.tmp")
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Directory of task records
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path of a task key
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Read and parse a record
    pub fn load(&self, key: &str) -> Result<Task> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(Error::NotFound(format!("task record {}", path.display())));
        }

        let content = std::fs::read_to_string(&path)?;
        let task: Task = serde_json::from_str(&content)?;
        if task.metadata.format_version != CURRENT_FORMAT_VERSION {
            warn!(
                task = %task.key,
                found = %task.metadata.format_version,
                expected = CURRENT_FORMAT_VERSION,
                "Task record has different format version"
            );
        }
        if task.key != key {
            return Err(Error::InconsistentState(format!(
                "record {} holds task key {:?}",
                path.display(),
                task.key
            )));
        }
        Ok(task)
    }

    /// Write a record, stamping its save time. Returns the written copy.
    pub fn save(&self, task: &Task) -> Result<Task> {
        let mut record = task.clone();
        record.metadata.saved_at = Some(Utc::now());
        record.metadata.format_version = CURRENT_FORMAT_VERSION.to_string();

        let path = self.path_for(&record.key);
        write_atomic(&path, &serde_json::to_string_pretty(&record)?)?;
        debug!(task = %record.key, path = %path.display(), "Task saved");
        Ok(record)
    }

    /// Remove a record; missing records are ignored
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Keys of every record in the directory, sorted
    pub fn list_keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys: Vec<String> = std::fs::read_dir(&self.dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "json").unwrap_or(false))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Load the tool catalog; a missing file is an empty catalog
pub fn load_tools(path: &Path) -> Result<Vec<Tool>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write the tool catalog
pub fn save_tools(path: &Path, tools: &[Tool]) -> Result<()> {
    write_atomic(path, &serde_json::to_string_pretty(tools)?)
}
