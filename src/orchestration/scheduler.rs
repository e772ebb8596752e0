//! The parallel DAG execution loop.
//!
//! The scheduler owns the run: it computes the ready set under the phase
//! barrier, dispatches executions into a bounded pool of spawned tasks,
//! and drives every completion through the merge coordinator before
//! recording it in the durable workflow state.
//!
//! Merging runs on this control loop, not in the pool: merges into the
//! shared mainline are strictly serialized even when implementation is
//! concurrent. Any executor or merge failure halts the whole run; partial
//! silently-incomplete automation is worse than a loud stop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::core::graph::TaskGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::executor::TaskExecutor;
use crate::orchestration::merge::MergeCoordinator;
use crate::workflow::state::{StateStore, WorkflowState};
use crate::{flog, flog_error};

/// Completion notification from a dispatched execution.
struct ExecOutcome {
    task_id: TaskId,
    result: Result<bool>,
}

/// Drives the master graph to completion.
pub struct Scheduler {
    graph: Arc<RwLock<TaskGraph>>,
    store: StateStore,
    state: WorkflowState,
    merged: HashSet<TaskId>,
    executor: Arc<TaskExecutor>,
    merger: MergeCoordinator,
    jobs: usize,
}

impl Scheduler {
    /// Build a scheduler over a loaded graph and persisted state.
    ///
    /// Tasks already recorded in the state are marked merged up front and
    /// are never re-dispatched.
    pub fn new(
        graph: TaskGraph,
        store: StateStore,
        state: WorkflowState,
        executor: TaskExecutor,
        merger: MergeCoordinator,
        jobs: usize,
    ) -> Self {
        let mut graph = graph;
        let mut merged: HashSet<TaskId> = HashSet::new();
        for id in state
            .completed_tasks
            .iter()
            .chain(state.merged_tasks.iter())
        {
            if let Some(task) = graph.get_mut(id) {
                task.mark_merged();
            }
            merged.insert(id.clone());
        }

        Self {
            graph: Arc::new(RwLock::new(graph)),
            store,
            state,
            merged,
            executor: Arc::new(executor),
            merger,
            jobs: jobs.max(1),
        }
    }

    /// Task ids merged so far (including those seeded from the state file).
    pub fn merged(&self) -> &HashSet<TaskId> {
        &self.merged
    }

    /// Current in-memory workflow state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Run the execution loop to completion.
    ///
    /// Returns `Ok(())` only when every task in the graph is merged. Any
    /// fatal condition aborts the in-flight pool and surfaces as `Err`;
    /// in-flight workspaces are left on disk for inspection.
    pub async fn run(&mut self) -> Result<()> {
        let (total, resumed) = {
            let graph = self.graph.read().await;
            (graph.len(), graph.len() - graph.pending_count(&self.merged))
        };
        if resumed > 0 {
            println!("   Resuming: {resumed} of {total} tasks already merged.");
        }
        println!("\n=> Starting Parallel DAG Execution Loop...");

        let (tx, mut rx) = mpsc::channel::<ExecOutcome>(self.jobs * 2);
        let mut active: HashMap<TaskId, JoinHandle<()>> = HashMap::new();

        loop {
            if self.graph.read().await.all_merged(&self.merged) {
                println!("\n=> All implementation tasks completed successfully!");
                flog!("scheduler: run complete, {} tasks merged", self.merged.len());
                return Ok(());
            }

            // Dispatch ready tasks up to capacity
            let ready = self.graph.read().await.ready_tasks(&self.merged);
            for task_id in ready {
                if active.len() >= self.jobs {
                    break;
                }
                if let Some(task) = self.graph.write().await.get_mut(&task_id) {
                    task.start();
                }
                flog!("scheduler: dispatching {}", task_id);

                let executor = Arc::clone(&self.executor);
                let tx = tx.clone();
                let id = task_id.clone();
                let handle = tokio::spawn(async move {
                    let result = executor.execute(&id).await;
                    let _ = tx.send(ExecOutcome { task_id: id, result }).await;
                });
                active.insert(task_id, handle);
            }

            // Nothing running and nothing dispatchable: done was checked
            // above, so this is a deadlock.
            if active.is_empty() {
                let graph = self.graph.read().await;
                let completed = graph.len() - graph.pending_count(&self.merged);
                let report = graph.diagnose_stall(&self.merged);
                println!("\n[!] FATAL: DAG deadlock or unrecoverable error. No tasks running and none ready.");
                println!("    Completed: {} / {}", completed, graph.len());
                print!("    {}", report);
                flog_error!("scheduler: deadlock, {}/{} merged: {}", completed, graph.len(), report);
                return Err(Error::Deadlock {
                    completed,
                    total: graph.len(),
                });
            }

            // Wait for one execution to resolve
            let outcome = match rx.recv().await {
                Some(outcome) => outcome,
                None => {
                    return Err(Error::Validation(
                        "scheduler completion channel closed unexpectedly".to_string(),
                    ))
                }
            };
            active.remove(&outcome.task_id);

            match outcome.result {
                Ok(true) => {
                    println!(
                        "   -> [Implementation] Task {} completed successfully.",
                        outcome.task_id
                    );
                    if let Some(task) = self.graph.write().await.get_mut(&outcome.task_id) {
                        task.complete();
                    }
                    self.integrate(&outcome.task_id, &mut active).await?;
                }
                Ok(false) => {
                    println!(
                        "\n[!] FATAL: Task {} failed implementation. Halting workflow.",
                        outcome.task_id
                    );
                    self.fail_task(&outcome.task_id, "implementation failed").await;
                    Self::abort_active(&mut active);
                    return Err(Error::TaskFailed {
                        id: outcome.task_id,
                    });
                }
                Err(e) => {
                    println!(
                        "\n[!] FATAL: Task {} raised an error: {}",
                        outcome.task_id, e
                    );
                    self.fail_task(&outcome.task_id, &e.to_string()).await;
                    Self::abort_active(&mut active);
                    return Err(e);
                }
            }
        }
    }

    /// Merge a completed task and persist the state, serialized on the
    /// control loop.
    async fn integrate(
        &mut self,
        task_id: &TaskId,
        active: &mut HashMap<TaskId, JoinHandle<()>>,
    ) -> Result<()> {
        match self.merger.merge(task_id).await {
            Ok(true) => {
                if let Some(task) = self.graph.write().await.get_mut(task_id) {
                    task.mark_merged();
                }
                self.merged.insert(task_id.clone());
                self.state.record_merged(task_id);
                self.store.save(&self.state)?;
                println!("   -> [Success] Task {} fully integrated into mainline.", task_id);
                flog!("scheduler: {} merged and recorded", task_id);
                Ok(())
            }
            Ok(false) => {
                println!(
                    "\n[!] FATAL: Task {} failed merging into mainline. Halting workflow.",
                    task_id
                );
                self.fail_task(task_id, "merge failed").await;
                Self::abort_active(active);
                Err(Error::MergeFailed {
                    id: task_id.clone(),
                })
            }
            Err(e) => {
                println!(
                    "\n[!] FATAL: Merging task {} raised an error: {}",
                    task_id, e
                );
                self.fail_task(task_id, &e.to_string()).await;
                Self::abort_active(active);
                Err(e)
            }
        }
    }

    async fn fail_task(&self, task_id: &TaskId, error: &str) {
        if let Some(task) = self.graph.write().await.get_mut(task_id) {
            task.fail(error);
        }
    }

    /// Shut the pool down without waiting for in-flight work.
    fn abort_active(active: &mut HashMap<TaskId, JoinHandle<()>>) {
        for (id, handle) in active.drain() {
            flog!("scheduler: aborting in-flight task {}", id);
            handle.abort();
        }
    }
}
