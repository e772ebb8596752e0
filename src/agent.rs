//! External AI agent invocation.
//!
//! The agent is an opaque collaborator: it reads a fully rendered prompt
//! on stdin, emits output on stdout/stderr, and its exit status is the
//! only structured signal consumed (0 = success). Output lines are
//! relayed with a task-scoped prefix so interleaved parallel streams stay
//! readable.
//!
//! `AgentRunner` is the substitution seam: production uses
//! `CommandAgent`, tests inject stubs.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::flog_debug;

/// Capability interface for running one agent invocation.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the agent in `cwd`, feeding `prompt` on stdin and relaying
    /// output lines tagged with `prefix`. Returns the process exit code.
    async fn run(&self, prompt: &str, cwd: &Path, prefix: &str) -> Result<i32>;
}

/// Agent invoked as a configured subprocess command.
pub struct CommandAgent {
    base_command: Vec<String>,
}

impl CommandAgent {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_command: config
                .command
                .split_whitespace()
                .map(String::from)
                .collect(),
        }
    }

    pub fn from_command(command: &str) -> Self {
        Self {
            base_command: command.split_whitespace().map(String::from).collect(),
        }
    }

    pub fn binary(&self) -> &str {
        self.base_command
            .first()
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

async fn relay_lines<R>(reader: R, prefix: String)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        println!("{}{}", prefix, line);
    }
}

#[async_trait]
impl AgentRunner for CommandAgent {
    async fn run(&self, prompt: &str, cwd: &Path, prefix: &str) -> Result<i32> {
        let Some((binary, args)) = self.base_command.split_first() else {
            return Err(Error::EmptyCommand);
        };
        flog_debug!("agent: running {} in {}", binary, cwd.display());

        let mut child = Command::new(binary)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Validation("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Validation("agent stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Validation("agent stderr unavailable".to_string()))?;

        // The prompt is written from its own task: an agent that fills its
        // output pipe before draining stdin would otherwise deadlock us.
        let prompt = prompt.to_string();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let out_relay = tokio::spawn(relay_lines(stdout, prefix.to_string()));
        let err_relay = tokio::spawn(relay_lines(stderr, prefix.to_string()));

        let status = child.wait().await?;
        let _ = writer.await;
        let _ = out_relay.await;
        let _ = err_relay.await;

        let code = status.code().unwrap_or(-1);
        flog_debug!("agent: exited with code {}", code);
        Ok(code)
    }
}
