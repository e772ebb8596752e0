//! Prompt template rendering and agent context assembly.
//!
//! Templates are plain markdown files with `{key}` placeholders. Context
//! comes from the task's own documentation, the project description, and
//! the accumulated memory notes; any of those may be absent and simply
//! contribute nothing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::task::TaskId;
use crate::error::Result;

/// Template for the implementation agent pass.
pub const IMPLEMENT_TEMPLATE: &str = "implement_task.md";
/// Template for the review agent pass (also used for retry remediation).
pub const REVIEW_TEMPLATE: &str = "review_task.md";
/// Template for the merge conflict-resolution agent.
pub const MERGE_TEMPLATE: &str = "merge_task.md";

/// Placeholder substitution context.
pub type PromptContext = HashMap<String, String>;

/// Loads prompt templates from the configured prompts directory.
pub struct PromptLibrary {
    prompts_dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    /// Read `template` and substitute every `{key}` placeholder.
    ///
    /// A missing template file is an error: the run cannot proceed
    /// without its prompts.
    pub fn render(&self, template: &str, context: &PromptContext) -> Result<String> {
        let raw = fs::read_to_string(self.prompts_dir.join(template))?;
        Ok(substitute(&raw, context))
    }
}

fn substitute(template: &str, context: &PromptContext) -> String {
    let mut rendered = template.to_string();
    for (key, value) in context {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

/// Gathers per-task context from the project tree.
pub struct ContextBuilder {
    tasks_dir: PathBuf,
    description_file: PathBuf,
    memory_file: PathBuf,
}

impl ContextBuilder {
    pub fn new(config: &Config, root: &Path) -> Self {
        Self {
            tasks_dir: config.tasks_path(root),
            description_file: config.description_path(root),
            memory_file: config.memory_path(root),
        }
    }

    /// All markdown describing a task: either a single file named after
    /// the task id, or every `.md` file inside a directory of that name.
    pub fn task_details(&self, id: &TaskId) -> String {
        let task_path = self.tasks_dir.join(id.as_str());
        let mut content = String::new();

        if task_path.is_file() {
            if let Ok(text) = fs::read_to_string(&task_path) {
                content.push_str(&text);
                content.push_str("\n\n");
            }
        } else if task_path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(&task_path)
                .into_iter()
                .flatten()
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().map(|ext| ext == "md").unwrap_or(false))
                .collect();
            files.sort();
            for file in files {
                if let Ok(text) = fs::read_to_string(&file) {
                    content.push_str(&text);
                    content.push_str("\n\n");
                }
            }
        }

        content
    }

    /// Project-level description, empty when absent.
    pub fn description(&self) -> String {
        fs::read_to_string(&self.description_file).unwrap_or_default()
    }

    /// Accumulated memory notes, empty when absent.
    pub fn memory(&self) -> String {
        fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Full substitution context for an implementation/review pass.
    pub fn task_context(&self, id: &TaskId) -> PromptContext {
        let mut context = PromptContext::new();
        context.insert("phase".to_string(), id.phase().to_string());
        context.insert("task_name".to_string(), id.name().to_string());
        context.insert("target_dir".to_string(), id.to_string());
        context.insert("task_details".to_string(), self.task_details(id));
        context.insert("description".to_string(), self.description());
        context.insert("memory".to_string(), self.memory());
        context
    }

    /// Substitution context for a merge pass over `branch`.
    pub fn merge_context(&self, id: &TaskId, branch: &str) -> PromptContext {
        let mut context = PromptContext::new();
        context.insert("phase".to_string(), id.phase().to_string());
        context.insert("task_name".to_string(), id.name().to_string());
        context.insert("branches_list".to_string(), branch.to_string());
        context.insert("description".to_string(), self.description());
        context
    }
}
