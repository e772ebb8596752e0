//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of orchestrated work. Each one maps to a
//! single isolated worktree and a single mainline merge. Tasks are
//! identified by a qualified id of the form `<phase_dir>/<task_name>`
//! (e.g. `phase_1/03_api_routes`) and carry an ordering key parsed from
//! the numeric prefixes of both components.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Qualified task identifier: `<phase_dir>/<task_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The phase component (everything before the first `/`).
    pub fn phase(&self) -> &str {
        match self.0.split_once('/') {
            Some((phase, _)) => phase,
            None => "",
        }
    }

    /// The task name component (everything after the first `/`).
    pub fn name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// Filesystem- and branch-safe form of the task name.
    pub fn safe_name(&self) -> String {
        self.name().replace('/', "_").replace(".md", "")
    }

    /// Task name truncated for stream prefixes.
    pub fn short_name(&self) -> String {
        let name = self.name();
        if name.chars().count() > 15 {
            let head: String = name.chars().take(15).collect();
            format!("{}..", head)
        } else {
            name.to_string()
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

fn phase_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^phase_(\d+)").expect("static regex"))
}

/// Parsed ordering key for a task id.
///
/// Computed once when the task enters the graph, never re-parsed per
/// comparison. The derived `Ord` compares phase first, then ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Numeric suffix of the `phase_<N>` directory (0 if unparseable).
    pub phase: u32,
    /// Leading numeric prefix of the task name (0 if unparseable).
    pub ordinal: u32,
}

impl TaskKey {
    /// Parse an ordering key from a qualified task id.
    ///
    /// Ids without a `/` separator sort after everything well-formed.
    pub fn parse(id: &TaskId) -> Self {
        let Some((phase_part, task_part)) = id.0.split_once('/') else {
            return Self {
                phase: 999,
                ordinal: 999,
            };
        };

        let phase = phase_number_re()
            .captures(phase_part)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);

        let ordinal = task_part
            .split('_')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Self { phase, ordinal }
    }
}

/// Task status in its lifecycle.
///
/// `Completed` means the executor succeeded but the work has not yet been
/// integrated into the mainline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task loaded but not yet dispatched.
    Pending,
    /// Task is being executed in its worktree.
    Active,
    /// Execution finished, merge not yet done.
    Completed,
    /// Task fully integrated into the mainline.
    Merged,
    /// Task failed.
    Failed {
        /// Description of the failure.
        error: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Merged => write!(f, "merged"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// A single task in the master dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Qualified identifier for this task.
    pub id: TaskId,
    /// Ordering key parsed from the id.
    pub key: TaskKey,
    /// Qualified ids of tasks that must merge before this one can start.
    pub prereqs: Vec<TaskId>,
    /// Current lifecycle status.
    pub status: TaskStatus,
}

impl Task {
    /// Create a pending task, computing its ordering key from the id.
    pub fn new(id: TaskId, prereqs: Vec<TaskId>) -> Self {
        let key = TaskKey::parse(&id);
        Self {
            id,
            key,
            prereqs,
            status: TaskStatus::Pending,
        }
    }

    /// Transition to Active when dispatched.
    pub fn start(&mut self) {
        self.status = TaskStatus::Active;
    }

    /// Transition to Completed when execution succeeds.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
    }

    /// Transition to Merged after mainline integration.
    pub fn mark_merged(&mut self) {
        self.status = TaskStatus::Merged;
    }

    /// Transition to Failed with a description.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
    }

    pub fn is_merged(&self) -> bool {
        self.status == TaskStatus::Merged
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }
}
