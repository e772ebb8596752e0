//! Durable workflow state.
//!
//! The state file records which tasks have completed and merged so an
//! interrupted run can resume without re-executing finished work. It is
//! rewritten synchronously after every successful merge; a crash between
//! execution success and the state write costs a safe re-execution, never
//! a silent loss.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::task::TaskId;
use crate::error::Result;
use crate::{flog_debug, flog_warn};

/// Persisted record of workflow progress.
///
/// `completed_tasks` is ordered by completion, `merged_tasks` by merge.
/// Every merged task also appears in `completed_tasks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub completed_tasks: Vec<TaskId>,
    #[serde(default)]
    pub merged_tasks: Vec<TaskId>,
}

impl WorkflowState {
    /// Record a task as completed and merged, preserving insertion order.
    pub fn record_merged(&mut self, id: &TaskId) {
        self.completed_tasks.push(id.clone());
        self.merged_tasks.push(id.clone());
    }

    pub fn is_completed(&self, id: &TaskId) -> bool {
        self.completed_tasks.contains(id)
    }

    pub fn is_merged(&self, id: &TaskId) -> bool {
        self.merged_tasks.contains(id)
    }
}

/// Load/save handle for the workflow state file.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    ///
    /// A missing, unreadable, or unparseable file yields the default empty
    /// state; corrupt state is never fatal.
    pub fn load(&self) -> WorkflowState {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            flog_debug!("state: no file at {}, starting empty", self.path.display());
            return WorkflowState::default();
        };

        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                flog_warn!(
                    "state: corrupt file at {} ({}), starting empty",
                    self.path.display(),
                    e
                );
                WorkflowState::default()
            }
        }
    }

    /// Persist the full state.
    ///
    /// Writes to a temporary sibling and renames over the target so a
    /// concurrent reader never observes a torn file.
    pub fn save(&self, state: &WorkflowState) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                parent.to_path_buf()
            }
            _ => PathBuf::from("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        flog_debug!(
            "state: saved {} completed / {} merged to {}",
            state.completed_tasks.len(),
            state.merged_tasks.len(),
            self.path.display()
        );
        Ok(())
    }
}
