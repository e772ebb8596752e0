//! Project configuration.
//!
//! Loaded from `foreman.toml` at the project root when present; every
//! field has a default so the file is optional. All paths are relative to
//! the project root.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{flog_debug, Result};

/// Default verification/merge attempt budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent command line, whitespace-split into argv.
    pub command: String,
    /// Mainline branch that tasks branch from and merge back into.
    pub mainline: String,
    /// Root of the per-phase task directories.
    pub tasks_dir: PathBuf,
    /// Directory holding the agent prompt templates.
    pub prompts_dir: PathBuf,
    /// Workflow state file.
    pub state_file: PathBuf,
    /// Project description fed into agent prompts.
    pub description_file: PathBuf,
    /// Accumulated memory notes fed into agent prompts.
    pub memory_file: PathBuf,
    /// Attempt budget for the verification and merge loops.
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: "gemini -y".to_string(),
            mainline: "main".to_string(),
            tasks_dir: PathBuf::from("docs/plan/tasks"),
            prompts_dir: PathBuf::from("scripts/prompts"),
            state_file: PathBuf::from("scripts/.workflow_state.json"),
            description_file: PathBuf::from("docs/plan/input/description.md"),
            memory_file: PathBuf::from(".agent/memory.md"),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Config {
    pub const FILE_NAME: &'static str = "foreman.toml";

    /// Load the config from `<root>/foreman.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(Self::FILE_NAME);
        flog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            flog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        Ok(config)
    }

    pub fn tasks_path(&self, root: &Path) -> PathBuf {
        root.join(&self.tasks_dir)
    }

    pub fn prompts_path(&self, root: &Path) -> PathBuf {
        root.join(&self.prompts_dir)
    }

    pub fn state_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_file)
    }

    pub fn description_path(&self, root: &Path) -> PathBuf {
        root.join(&self.description_file)
    }

    pub fn memory_path(&self, root: &Path) -> PathBuf {
        root.join(&self.memory_file)
    }
}
