//! The caller-supplied verification command.
//!
//! An arbitrary external command run inside a workspace or merge clone:
//! exit 0 means pass, and the captured stdout+stderr feed back into agent
//! prompts on failure.

use std::path::Path;

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::flog_debug;

/// Outcome of one presubmit run.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Whether the command exited 0.
    pub passed: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Parsed presubmit command, whitespace-split into argv.
#[derive(Debug, Clone)]
pub struct PresubmitCommand {
    argv: Vec<String>,
}

impl PresubmitCommand {
    pub fn parse(command: &str) -> Result<Self> {
        let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err(Error::EmptyCommand);
        }
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Run the command in `cwd`, capturing its output.
    pub async fn run(&self, cwd: &Path) -> Result<Verdict> {
        flog_debug!("presubmit: running {:?} in {}", self.argv, cwd.display());
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .current_dir(cwd)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push('\n');
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(Verdict {
            passed: output.status.success(),
            output: combined,
        })
    }
}
