//! Master task dependency graph.
//!
//! The graph is assembled once at startup from per-phase dependency files
//! and is immutable in membership afterwards. Scheduling reads it to
//! compute the ready set under the phase barrier; only task statuses
//! mutate during a run.
//!
//! Prerequisites that reference ids absent from the graph are kept
//! verbatim: such a dependent can never become ready, which surfaces as a
//! deadlock once nothing else is runnable. `diagnose_stall` exists to turn
//! that silent condition into an actionable report.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::task::{Task, TaskId};

/// The master dependency graph, keyed by qualified task id.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Add a task. A duplicate id replaces the previous entry.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate over all tasks in no particular order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// All task ids whose prerequisites are merged and which pass the
    /// phase barrier, ordered by (phase, ordinal, id).
    ///
    /// The barrier: among all not-yet-merged tasks, find the numerically
    /// lowest phase present; only tasks of that phase may dispatch, even
    /// when a later-phase task's own prerequisites are already satisfied.
    pub fn ready_tasks(&self, merged: &HashSet<TaskId>) -> Vec<TaskId> {
        let barrier_phase = self
            .tasks
            .values()
            .filter(|t| !merged.contains(&t.id))
            .map(|t| t.key.phase)
            .min();

        let Some(barrier_phase) = barrier_phase else {
            return Vec::new();
        };

        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.is_pending() && !merged.contains(&t.id))
            .filter(|t| t.prereqs.iter().all(|p| merged.contains(p)))
            .filter(|t| t.key.phase == barrier_phase)
            .collect();

        ready.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.id.cmp(&b.id)));
        ready.into_iter().map(|t| t.id.clone()).collect()
    }

    /// True when every task in the graph appears in the merged set.
    pub fn all_merged(&self, merged: &HashSet<TaskId>) -> bool {
        self.tasks.keys().all(|id| merged.contains(id))
    }

    /// Number of tasks not yet in the merged set.
    pub fn pending_count(&self, merged: &HashSet<TaskId>) -> usize {
        self.tasks
            .keys()
            .filter(|id| !merged.contains(*id))
            .count()
    }

    /// Explain why no progress is possible.
    ///
    /// Reports unmerged tasks with prerequisites that are not graph
    /// members, and dependency cycles among the remaining tasks.
    pub fn diagnose_stall(&self, merged: &HashSet<TaskId>) -> StallReport {
        let mut missing: Vec<(TaskId, Vec<TaskId>)> = self
            .tasks
            .values()
            .filter(|t| !merged.contains(&t.id))
            .filter_map(|t| {
                let absent: Vec<TaskId> = t
                    .prereqs
                    .iter()
                    .filter(|p| !self.tasks.contains_key(*p))
                    .cloned()
                    .collect();
                if absent.is_empty() {
                    None
                } else {
                    Some((t.id.clone(), absent))
                }
            })
            .collect();
        missing.sort_by(|a, b| a.0.cmp(&b.0));

        // Cycle detection over the unmerged remainder of the graph.
        let mut dag: DiGraph<TaskId, ()> = DiGraph::new();
        let mut index: HashMap<&TaskId, NodeIndex> = HashMap::new();
        for task in self.tasks.values().filter(|t| !merged.contains(&t.id)) {
            let node = dag.add_node(task.id.clone());
            index.insert(&task.id, node);
        }
        for task in self.tasks.values().filter(|t| !merged.contains(&t.id)) {
            for prereq in &task.prereqs {
                if let (Some(&from), Some(&to)) = (index.get(prereq), index.get(&task.id)) {
                    dag.add_edge(from, to, ());
                }
            }
        }

        let mut cycles: Vec<Vec<TaskId>> = tarjan_scc(&dag)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| dag.find_edge(n, n).is_some())
            })
            .map(|scc| {
                let mut ids: Vec<TaskId> = scc.into_iter().map(|n| dag[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();

        StallReport { missing, cycles }
    }
}

/// Diagnostic produced when the scheduler detects a deadlock.
#[derive(Debug, Clone, Default)]
pub struct StallReport {
    /// Unmerged tasks paired with prerequisites absent from the graph.
    pub missing: Vec<(TaskId, Vec<TaskId>)>,
    /// Dependency cycles among unmerged tasks.
    pub cycles: Vec<Vec<TaskId>>,
}

impl StallReport {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.cycles.is_empty()
    }
}

impl std::fmt::Display for StallReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no missing prerequisites or cycles detected");
        }
        for (task, absent) in &self.missing {
            let names: Vec<&str> = absent.iter().map(|p| p.as_str()).collect();
            writeln!(f, "{} waits on undefined prerequisites: {}", task, names.join(", "))?;
        }
        for cycle in &self.cycles {
            let names: Vec<&str> = cycle.iter().map(|p| p.as_str()).collect();
            writeln!(f, "dependency cycle: {}", names.join(" -> "))?;
        }
        Ok(())
    }
}
