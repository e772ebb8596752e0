//! Scheduler tests: DAG execution order, the phase barrier, bounded
//! parallelism, resume, durability, and deadlock detection.

use std::time::Duration;

use foreman::core::task::TaskId;
use foreman::workflow::WorkflowState;
use foreman::Error;

use crate::fixtures::{cleanup_workspaces, StubAgent, TestProject};

const RUN_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::test]
async fn test_diamond_graph_runs_to_completion() {
    let project = TestProject::new();
    project.write_phase_dag(
        "phase_1",
        r#"{
            "01_alpha": [],
            "02_beta": [],
            "03_gamma": ["01_alpha", "02_beta"]
        }"#,
    );

    let agent = StubAgent::slow(Duration::from_millis(100));
    let mut scheduler = project.scheduler(agent.clone(), "true", 2);

    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("run should succeed");

    // every task merged, with gamma strictly last
    let state = scheduler.state().clone();
    assert_eq!(state.completed_tasks.len(), 3);
    assert_eq!(state.merged_tasks.len(), 3);
    assert_eq!(state.merged_tasks[2], TaskId::new("phase_1/03_gamma"));

    // with capacity 2, alpha and beta ran concurrently
    assert!(agent.max_overlap() >= 2);

    // gamma branched from the advanced mainline, so its fast-forward
    // published its own output
    assert_eq!(
        project.branch_tip("main"),
        project.branch_tip("foreman/03_gamma")
    );
}

#[tokio::test]
async fn test_serial_execution_with_one_job() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_alpha": [], "02_beta": []}"#);

    let agent = StubAgent::slow(Duration::from_millis(50));
    let mut scheduler = project.scheduler(agent.clone(), "true", 1);

    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("run should succeed");

    assert_eq!(agent.max_overlap(), 1);
    assert_eq!(scheduler.state().merged_tasks.len(), 2);
}

#[tokio::test]
async fn test_phase_barrier_orders_merges() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_alpha": [], "02_beta": []}"#);
    project.write_phase_dag("phase_2", r#"{"01_delta": []}"#);

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent, "true", 4);

    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("run should succeed");

    // delta has no prerequisites, but the barrier held it behind phase 1
    let merged = &scheduler.state().merged_tasks;
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[2], TaskId::new("phase_2/01_delta"));
}

#[tokio::test]
async fn test_state_survives_reload_after_run() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_alpha": []}"#);

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent, "true", 1);
    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("run should succeed");

    // simulate a crash-and-restart: reload from disk
    let reloaded = project.state_store().load();
    assert!(reloaded.is_completed(&TaskId::new("phase_1/01_alpha")));
    assert!(reloaded.is_merged(&TaskId::new("phase_1/01_alpha")));
}

#[tokio::test]
async fn test_resume_never_redispatches_recorded_tasks() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_alpha": [], "02_beta": ["01_alpha"]}"#);

    // a previous run already integrated alpha
    let mut prior = WorkflowState::default();
    prior.record_merged(&TaskId::new("phase_1/01_alpha"));
    project.state_store().save(&prior).unwrap();

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent.clone(), "true", 2);
    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("run should succeed");

    // only beta was dispatched
    assert_eq!(agent.prompts_containing("01_alpha"), 0);
    assert!(agent.prompts_containing("02_beta") > 0);

    let state = project.state_store().load();
    assert_eq!(
        state.merged_tasks,
        vec![
            TaskId::new("phase_1/01_alpha"),
            TaskId::new("phase_1/02_beta")
        ]
    );
}

#[tokio::test]
async fn test_undefined_prerequisite_reports_deadlock() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_alpha": ["99_ghost"]}"#);

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent, "true", 2);

    let result = tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("deadlock must be reported, not hang");
    assert!(matches!(
        result,
        Err(Error::Deadlock {
            completed: 0,
            total: 1
        })
    ));
}

#[tokio::test]
async fn test_deadlock_detected_after_runnable_work_drains() {
    let project = TestProject::new();
    project.write_phase_dag(
        "phase_1",
        r#"{"01_alpha": [], "02_beta": ["99_ghost"]}"#,
    );

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent, "true", 1);

    let result = tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("deadlock must be reported, not hang");

    // alpha completed and merged first; only then did the stall surface
    assert!(matches!(
        result,
        Err(Error::Deadlock {
            completed: 1,
            total: 2
        })
    ));
    let state = project.state_store().load();
    assert!(state.is_merged(&TaskId::new("phase_1/01_alpha")));
}

#[tokio::test]
async fn test_executor_failure_halts_the_run() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_schedfail": []}"#);

    let agent = StubAgent::failing(2);
    let mut scheduler = project.scheduler(agent, "true", 1);

    let result = tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("failure must be reported, not hang");
    assert!(matches!(result, Err(Error::TaskFailed { .. })));

    // nothing was recorded as merged
    assert_eq!(project.state_store().load(), WorkflowState::default());
    cleanup_workspaces("01_schedfail");
}

#[tokio::test]
async fn test_merge_failure_halts_the_run() {
    let project = TestProject::new();
    project.write_phase_dag("phase_1", r#"{"01_mergefatal": []}"#);

    // pass inside executor workspaces, fail inside merge clones
    let script = project.write_script(
        "split_presubmit.sh",
        "#!/bin/sh\n\
         case \"$(basename \"$PWD\")\" in\n\
           merge_*) exit 1;;\n\
           *) exit 0;;\n\
         esac\n",
    );

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent, &script, 1);

    let result = tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("failure must be reported, not hang");
    assert!(matches!(result, Err(Error::MergeFailed { .. })));
    assert_eq!(project.state_store().load(), WorkflowState::default());
}

#[tokio::test]
async fn test_empty_graph_completes_immediately() {
    let project = TestProject::new();

    let agent = StubAgent::productive();
    let mut scheduler = project.scheduler(agent.clone(), "true", 2);

    tokio::time::timeout(RUN_TIMEOUT, scheduler.run())
        .await
        .expect("run should not hang")
        .expect("empty graph is a successful run");
    assert_eq!(agent.total_prompts(), 0);
}
