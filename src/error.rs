use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent not available: {0}")]
    AgentNotAvailable(String),

    #[error("Presubmit command is empty")]
    EmptyCommand,

    #[error("Task {id} failed implementation")]
    TaskFailed { id: TaskId },

    #[error("Task {id} failed merging into mainline")]
    MergeFailed { id: TaskId },

    #[error("DAG deadlock: no tasks running and none ready ({completed}/{total} merged)")]
    Deadlock { completed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
