//! Workflow persistence: the durable completed/merged record that makes
//! runs resumable.

pub mod state;

pub use state::{StateStore, WorkflowState};
