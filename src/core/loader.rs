//! Dependency graph loading from per-phase dependency files.
//!
//! Each phase directory under the tasks root may carry a JSON file mapping
//! local task names to lists of local prerequisite names. The loader
//! qualifies both sides as `<phase_dir>/<name>` and merges everything into
//! one master graph. Malformed files are logged and skipped; a phase
//! without a dependency file simply contributes no tasks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::graph::TaskGraph;
use crate::core::task::{Task, TaskId};
use crate::flog_warn;

/// Name of the per-phase dependency file.
pub const DEPENDENCY_FILE: &str = "dag_reviewed.json";

/// Prefix a directory must carry to be treated as a phase.
const PHASE_PREFIX: &str = "phase_";

/// Build the master graph from every phase directory under `tasks_dir`.
///
/// A missing tasks directory yields an empty graph. Directories whose
/// name does not start with `phase_` are ignored.
pub fn load_graph(tasks_dir: &Path) -> TaskGraph {
    let mut graph = TaskGraph::new();

    let Ok(entries) = fs::read_dir(tasks_dir) else {
        return graph;
    };

    let mut phase_dirs: Vec<_> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(PHASE_PREFIX))
        .map(|e| e.path())
        .collect();
    phase_dirs.sort();

    for phase_path in phase_dirs {
        let Some(phase_dir) = phase_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let dag_file = phase_path.join(DEPENDENCY_FILE);
        if !dag_file.exists() {
            continue;
        }

        let contents = match fs::read_to_string(&dag_file) {
            Ok(contents) => contents,
            Err(e) => {
                println!("Error reading {}: {}", dag_file.display(), e);
                flog_warn!("loader: unreadable {}: {}", dag_file.display(), e);
                continue;
            }
        };

        match serde_json::from_str::<BTreeMap<String, Vec<String>>>(&contents) {
            Ok(phase_dag) => {
                for (name, prereqs) in phase_dag {
                    let id = TaskId::new(format!("{}/{}", phase_dir, name));
                    let prereqs = prereqs
                        .into_iter()
                        .map(|p| TaskId::new(format!("{}/{}", phase_dir, p)))
                        .collect();
                    graph.insert(Task::new(id, prereqs));
                }
            }
            Err(e) => {
                println!("Error parsing {}: {}", dag_file.display(), e);
                flog_warn!("loader: malformed {}: {}", dag_file.display(), e);
            }
        }
    }

    graph
}
