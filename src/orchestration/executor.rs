//! Single-task execution lifecycle.
//!
//! One `execute` call owns the whole journey of a task: an isolated
//! worktree on a fresh branch, an implementation agent pass, a review
//! agent pass, then a bounded verification loop that feeds presubmit
//! failures back to the review agent. On success the worktree is removed
//! (the branch stays for the merge stage); on failure the worktree and
//! branch are deliberately left on disk for human inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::core::task::TaskId;
use crate::error::Result;
use crate::git::GitOps;
use crate::orchestration::prompt::{
    ContextBuilder, PromptContext, PromptLibrary, IMPLEMENT_TEMPLATE, REVIEW_TEMPLATE,
};
use crate::orchestration::task_branch;
use crate::orchestration::verify::PresubmitCommand;
use crate::{flog, flog_error, flog_warn};

/// Executes one task in an isolated workspace.
pub struct TaskExecutor {
    git: GitOps,
    agent: Arc<dyn AgentRunner>,
    prompts: PromptLibrary,
    context: ContextBuilder,
    presubmit: PresubmitCommand,
    mainline: String,
    max_retries: u32,
}

impl TaskExecutor {
    pub fn new(
        git: GitOps,
        agent: Arc<dyn AgentRunner>,
        prompts: PromptLibrary,
        context: ContextBuilder,
        presubmit: PresubmitCommand,
        mainline: String,
        max_retries: u32,
    ) -> Self {
        Self {
            git,
            agent,
            prompts,
            context,
            presubmit,
            mainline,
            max_retries,
        }
    }

    /// Run the full lifecycle for `id`.
    ///
    /// `Ok(false)` is a task-level failure (agent exit or exhausted
    /// retries); `Err` is an environment fault. Either halts the run at
    /// the scheduler, but only `Ok(false)` guarantees the preserved
    /// workspace described above.
    pub async fn execute(&self, id: &TaskId) -> Result<bool> {
        let branch = task_branch(id);
        let workdir = self.create_workspace_dir(id)?;

        println!("\n   -> [Implementation] Starting {}", id);
        println!(
            "      Creating git worktree at {} on branch {}...",
            workdir.display(),
            branch
        );
        self.git.create_workspace(&branch, &workdir, &self.mainline)?;

        let outcome = self.run_in_workspace(id, &workdir).await;
        match outcome {
            Ok(true) => {
                println!("      Cleaning up worktree {}...", workdir.display());
                self.git.remove_worktree(&workdir)?;
                Ok(true)
            }
            Ok(false) => {
                println!(
                    "      [!] Task failed. Leaving worktree {} and branch {} for investigation.",
                    workdir.display(),
                    branch
                );
                flog_warn!(
                    "executor: {} failed, workspace preserved at {}",
                    id,
                    workdir.display()
                );
                Ok(false)
            }
            Err(e) => {
                flog_error!(
                    "executor: {} hit an environment fault, workspace preserved at {}",
                    id,
                    workdir.display()
                );
                Err(e)
            }
        }
    }

    /// Reserve a unique workspace path in the system temp dir.
    fn create_workspace_dir(&self, id: &TaskId) -> Result<PathBuf> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("ai_{}_", id.safe_name()))
            .tempdir()?;
        let workdir = staging.keep();
        // git insists on creating the worktree directory itself
        std::fs::remove_dir(&workdir)?;
        Ok(workdir)
    }

    async fn run_in_workspace(&self, id: &TaskId, workdir: &Path) -> Result<bool> {
        let mut context = self.context.task_context(id);
        let prefix = format!("[{}/{}] ", id.phase(), id.short_name());

        // 1. Implementation pass
        if !self.run_agent("Implementation", IMPLEMENT_TEMPLATE, &context, workdir, &prefix).await? {
            return Ok(false);
        }

        // 2. Review pass
        if !self.run_agent("Review", REVIEW_TEMPLATE, &context, workdir, &prefix).await? {
            return Ok(false);
        }

        // 3. Verification loop
        for attempt in 1..=self.max_retries {
            println!(
                "      [Verification] Running presubmit (Attempt {}/{})...",
                attempt, self.max_retries
            );
            let verdict = self.presubmit.run(workdir).await?;

            if verdict.passed {
                println!("      [Verification] Presubmit passed!");
                if self.git.is_dirty(workdir)? {
                    self.git.commit_all(
                        workdir,
                        &format!("{}:{}: task implementation", id.phase(), id.name()),
                    )?;
                } else {
                    println!("      [Verification] No changes to commit for {}.", id);
                }
                return Ok(true);
            }

            println!("      [Verification] Presubmit failed.");
            if attempt < self.max_retries {
                let details = context.entry("task_details".to_string()).or_default();
                details.push_str(&format!(
                    "\n\n### PRESUBMIT FAILURE (Attempt {attempt})\nThe presubmit \
                     command failed with the following output. Please fix the code.\n\n\
                     ```\n{}\n```\n",
                    verdict.output
                ));
                if !self
                    .run_agent("Review (Retry)", REVIEW_TEMPLATE, &context, workdir, &prefix)
                    .await?
                {
                    return Ok(false);
                }
            }
        }

        println!(
            "   -> [!] Task {} failed presubmit {} times. Aborting task.",
            id, self.max_retries
        );
        Ok(false)
    }

    async fn run_agent(
        &self,
        label: &str,
        template: &str,
        context: &PromptContext,
        workdir: &Path,
        prefix: &str,
    ) -> Result<bool> {
        let prompt = self.prompts.render(template, context)?;
        println!("      [{}] Starting agent in {}...", label, workdir.display());
        flog!("executor: [{}] agent pass in {}", label, workdir.display());

        let code = self.agent.run(&prompt, workdir, prefix).await?;
        if code != 0 {
            println!(
                "      [{}] FATAL: Agent process failed with exit code {}",
                label, code
            );
            flog_error!("executor: [{}] agent exited with code {}", label, code);
            return Ok(false);
        }
        Ok(true)
    }
}
