//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git projects with phase/task layouts
//! - A stub agent recording prompts and simulating work
//! - Presubmit scripts with scripted pass/fail behavior

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use foreman::agent::AgentRunner;
use foreman::config::Config;
use foreman::core::loader::load_graph;
use foreman::git::GitOps;
use foreman::orchestration::{
    ContextBuilder, MergeCoordinator, PresubmitCommand, PromptLibrary, Scheduler, TaskExecutor,
};
use foreman::workflow::StateStore;
use foreman::Result;

/// A test project: a git repository with task phases and prompt templates.
pub struct TestProject {
    /// Owns the temporary directory for the project.
    pub temp_dir: TempDir,
    /// Path to the project root.
    pub path: PathBuf,
}

impl TestProject {
    /// Create a project with an initial commit on `main`.
    ///
    /// HEAD is parked on a side branch so pushes from merge clones to
    /// `main` are unobstructed.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp directory");
        let path = temp_dir.path().to_path_buf();

        git(&path, &["init"]);
        git(&path, &["config", "user.email", "test@test.com"]);
        git(&path, &["config", "user.name", "Test User"]);

        std::fs::write(path.join("README.md"), "# Test Project\n").expect("write README");
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "Initial commit"]);
        git(&path, &["branch", "-M", "main"]);
        git(&path, &["checkout", "-b", "anchor"]);

        let project = Self { temp_dir, path };
        project.write_prompts();
        project
    }

    /// Write the three prompt templates with recognizable prefixes so the
    /// stub agent's recorded prompts can be classified per pass.
    pub fn write_prompts(&self) {
        let dir = self.path.join("scripts/prompts");
        std::fs::create_dir_all(&dir).expect("create prompts dir");
        std::fs::write(
            dir.join("implement_task.md"),
            "IMPLEMENT {task_name}\n{task_details}\n{description}\n{memory}\n",
        )
        .expect("write implement template");
        std::fs::write(
            dir.join("review_task.md"),
            "REVIEW {task_name}\n{task_details}\n",
        )
        .expect("write review template");
        std::fs::write(
            dir.join("merge_task.md"),
            "MERGE {task_name} on {branches_list}\n{description}\n",
        )
        .expect("write merge template");
    }

    /// Write a phase's dependency file from raw JSON.
    pub fn write_phase_dag(&self, phase: &str, json: &str) {
        let dir = self.path.join("docs/plan/tasks").join(phase);
        std::fs::create_dir_all(&dir).expect("create phase dir");
        std::fs::write(dir.join("dag_reviewed.json"), json).expect("write dag file");
    }

    /// Write an executable presubmit script and return its absolute path.
    pub fn write_script(&self, name: &str, body: &str) -> String {
        let path = self.path.join(name);
        std::fs::write(&path, body).expect("write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
        }
        path.to_string_lossy().into_owned()
    }

    /// Commit a file directly onto `main`, returning HEAD to the anchor.
    pub fn advance_main(&self, filename: &str, content: &str) {
        git(&self.path, &["checkout", "main"]);
        std::fs::write(self.path.join(filename), content).expect("write file");
        git(&self.path, &["add", filename]);
        git(&self.path, &["commit", "-m", &format!("advance: {filename}")]);
        git(&self.path, &["checkout", "anchor"]);
    }

    /// Current commit id of a branch.
    pub fn branch_tip(&self, branch: &str) -> String {
        git_output(&self.path, &["rev-parse", branch])
    }

    /// Whether `main` contains a file at `path`.
    pub fn main_has_file(&self, path: &str) -> bool {
        Command::new("git")
            .args(["cat-file", "-e", &format!("main:{path}")])
            .current_dir(&self.path)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn git_ops(&self) -> GitOps {
        GitOps::new(&self.path).expect("open repo")
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(Config::default().state_path(&self.path))
    }

    pub fn executor(
        &self,
        agent: Arc<dyn AgentRunner>,
        presubmit_cmd: &str,
        max_retries: u32,
    ) -> TaskExecutor {
        let config = Config::default();
        TaskExecutor::new(
            self.git_ops(),
            agent,
            PromptLibrary::new(config.prompts_path(&self.path)),
            ContextBuilder::new(&config, &self.path),
            PresubmitCommand::parse(presubmit_cmd).expect("parse presubmit"),
            "main".to_string(),
            max_retries,
        )
    }

    pub fn merger(
        &self,
        agent: Arc<dyn AgentRunner>,
        presubmit_cmd: &str,
        max_retries: u32,
    ) -> MergeCoordinator {
        let config = Config::default();
        MergeCoordinator::new(
            self.git_ops(),
            agent,
            PromptLibrary::new(config.prompts_path(&self.path)),
            ContextBuilder::new(&config, &self.path),
            PresubmitCommand::parse(presubmit_cmd).expect("parse presubmit"),
            "main".to_string(),
            max_retries,
        )
    }

    /// Build a scheduler over the project's task layout and state file.
    pub fn scheduler(
        &self,
        agent: Arc<dyn AgentRunner>,
        presubmit_cmd: &str,
        jobs: usize,
    ) -> Scheduler {
        let config = Config::default();
        let graph = load_graph(&config.tasks_path(&self.path));
        let store = self.state_store();
        let state = store.load();
        Scheduler::new(
            graph,
            store,
            state,
            self.executor(Arc::clone(&agent), presubmit_cmd, config.max_retries),
            self.merger(agent, presubmit_cmd, config.max_retries),
            jobs,
        )
    }
}

fn git(cwd: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn git_output(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("run git");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Stub agent: records every prompt, optionally writes a file into the
/// working directory on implementation passes, and tracks how many
/// invocations overlapped.
pub struct StubAgent {
    exit_code: i32,
    write_files: bool,
    delay: Duration,
    seq: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubAgent {
    /// Agent that succeeds and produces a file per implementation pass.
    pub fn productive() -> Arc<Self> {
        Arc::new(Self {
            exit_code: 0,
            write_files: true,
            delay: Duration::ZERO,
            seq: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Productive agent that also sleeps, to make overlap observable.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::productive_inner()
        })
    }

    /// Agent that succeeds without touching the working tree.
    pub fn idle() -> Arc<Self> {
        Arc::new(Self {
            write_files: false,
            ..Self::productive_inner()
        })
    }

    /// Agent that exits with the given non-zero code.
    pub fn failing(exit_code: i32) -> Arc<Self> {
        Arc::new(Self {
            exit_code,
            write_files: false,
            ..Self::productive_inner()
        })
    }

    fn productive_inner() -> Self {
        Self {
            exit_code: 0,
            write_files: true,
            delay: Duration::ZERO,
            seq: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of recorded prompts starting with `prefix`.
    pub fn prompts_matching(&self, prefix: &str) -> usize {
        self.prompts
            .lock()
            .expect("prompts lock")
            .iter()
            .filter(|p| p.starts_with(prefix))
            .count()
    }

    /// Number of recorded prompts containing `needle`.
    pub fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .expect("prompts lock")
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    pub fn total_prompts(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_overlap(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentRunner for StubAgent {
    async fn run(&self, prompt: &str, cwd: &Path, _prefix: &str) -> Result<i32> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());

        if self.write_files && prompt.starts_with("IMPLEMENT") {
            let n = self.seq.fetch_add(1, Ordering::SeqCst);
            std::fs::write(cwd.join(format!("agent_output_{n}.txt")), prompt)?;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.exit_code)
    }
}

/// Workspace directories left in the system temp dir for a task.
pub fn find_workspaces(safe_name: &str) -> Vec<PathBuf> {
    let prefix = format!("ai_{safe_name}_");
    std::fs::read_dir(std::env::temp_dir())
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect()
}

/// Remove preserved workspaces so failed-task tests do not accumulate
/// directories in the system temp dir.
pub fn cleanup_workspaces(safe_name: &str) {
    for path in find_workspaces(safe_name) {
        let _ = std::fs::remove_dir_all(path);
    }
}
