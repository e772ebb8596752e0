//! Mainline integration of completed task branches.
//!
//! All merge work happens in a disposable clone of the mainline
//! repository, never in an executor workspace and never in the
//! developer's own checkout. Attempt 1 is the fast path: fetch the task
//! branch and fast-forward. Every later attempt resets the clone and asks
//! a merge agent to reconcile, with the previous failure's output in its
//! prompt. Each attempt re-verifies before anything is published.

use std::path::Path;
use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::core::task::TaskId;
use crate::error::Result;
use crate::git::GitOps;
use crate::orchestration::prompt::{ContextBuilder, PromptLibrary, MERGE_TEMPLATE};
use crate::orchestration::task_branch;
use crate::orchestration::verify::PresubmitCommand;
use crate::{flog, flog_warn};

/// Integrates completed tasks into the shared mainline.
pub struct MergeCoordinator {
    git: GitOps,
    agent: Arc<dyn AgentRunner>,
    prompts: PromptLibrary,
    context: ContextBuilder,
    presubmit: PresubmitCommand,
    mainline: String,
    max_retries: u32,
}

impl MergeCoordinator {
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

    /// Merge `id`'s integration branch into the mainline.
    ///
    /// `Ok(false)` means the attempt budget ran out. The disposable clone
    /// is removed on every exit path.
    pub async fn merge(&self, id: &TaskId) -> Result<bool> {
        let branch = task_branch(id);
        let clone_dir = tempfile::Builder::new()
            .prefix(&format!("merge_{}_", id.safe_name()))
            .tempdir()?;

        println!("\n   => [Merge] Attempting to merge {} into {}...", id, self.mainline);
        println!("      Cloning repository to {}...", clone_dir.path().display());

        let result = self.merge_in_clone(id, &branch, clone_dir.path()).await;

        println!("      Cleaning up merge clone {}...", clone_dir.path().display());
        drop(clone_dir);
        result
    }

    async fn merge_in_clone(&self, id: &TaskId, branch: &str, clone_path: &Path) -> Result<bool> {
        self.git.clone_to(clone_path)?;
        let clone = GitOps::new(clone_path)?;
        let prefix = format!("[merge/{}] ", id.short_name());

        let mut failure_output = String::new();
        for attempt in 1..=self.max_retries {
            if attempt == 1 {
                println!(
                    "      [Merge] Attempting fast-forward merge (Attempt 1/{})...",
                    self.max_retries
                );
                clone.fetch_branch(branch)?;
                clone.checkout_mainline(&self.mainline)?;

                if clone.fast_forward(branch, &self.mainline)? {
                    println!("      [Merge] Fast-forward successful. Running presubmit...");
                    let verdict = self.presubmit.run(clone_path).await?;
                    if verdict.passed {
                        println!("      [Merge] Presubmit passed! Publishing to {}.", self.mainline);
                        clone.push_mainline(&self.mainline)?;
                        return Ok(true);
                    }
                    println!("      [Merge] Presubmit failed after fast-forward.");
                    failure_output = verdict.output;
                } else {
                    println!("      [Merge] Fast-forward failed (diverged).");
                    failure_output = format!(
                        "fast-forward of {} onto {} was not possible: the histories have diverged",
                        branch, self.mainline
                    );
                }
            } else {
                println!(
                    "      [Merge] Spawning merge agent to resolve conflicts (Attempt {}/{})...",
                    attempt, self.max_retries
                );
                clone.reset_to_remote(&self.mainline)?;

                let mut context = self.context.merge_context(id, branch);
                let description = context.entry("description".to_string()).or_default();
                description.push_str(&format!(
                    "\n\n### PREVIOUS ATTEMPT FAILURE\nThe previous merge or presubmit \
                     failed with:\n```\n{failure_output}\n```\n"
                ));

                let prompt = self.prompts.render(MERGE_TEMPLATE, &context)?;
                let code = self.agent.run(&prompt, clone_path, &prefix).await?;
                if code != 0 {
                    println!("      [!] Merge agent failed to cleanly exit.");
                    flog_warn!("merge: agent for {} exited with code {}", id, code);
                    continue;
                }

                println!("      [Merge] Verifying agent's merge...");
                let verdict = self.presubmit.run(clone_path).await?;
                if verdict.passed {
                    println!("      [Merge] Presubmit passed! Publishing to {}.", self.mainline);
                    clone.push_mainline(&self.mainline)?;
                    return Ok(true);
                }
                println!("      [Merge] Presubmit failed after agent merge.");
                failure_output = verdict.output;
            }
        }

        println!(
            "   -> [!] Failed to merge {} after {} attempts.",
            id, self.max_retries
        );
        flog!("merge: {} exhausted {} attempts", id, self.max_retries);
        Ok(false)
    }
}
