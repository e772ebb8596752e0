//! Core task model: identifiers, the master dependency graph, and the
//! loader that assembles it from per-phase dependency files.

pub mod graph;
pub mod loader;
pub mod task;

pub use graph::{StallReport, TaskGraph};
pub use loader::load_graph;
pub use task::{Task, TaskId, TaskKey, TaskStatus};
