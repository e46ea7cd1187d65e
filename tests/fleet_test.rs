//! Fleet scheduler integration tests over real SQLite persistence.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hivemind::adapters::drivers::{MockDriver, MockScript};
use hivemind::domain::models::EventKind;
use hivemind::services::event_store::{EventQuery, EventStore};
use hivemind::services::fleet::{FleetError, Submission};

use common::fixture;

fn submission(task: &str, workdir: PathBuf) -> Submission {
    Submission::new(task, "testproj", workdir)
}

#[tokio::test]
async fn test_concurrency_ceiling_holds_under_burst() {
    let driver = Arc::new(MockDriver::new().with_default(
        MockScript::success("done").with_delay(Duration::from_millis(200)),
    ));
    let f = fixture(driver.clone(), 2).await;

    for i in 0..4 {
        f.fleet
            .submit(driver.clone(), submission(&format!("task {i}"), PathBuf::from("/tmp")))
            .await
            .unwrap();
    }

    assert!(f.fleet.running_count().await <= 2);
    assert!(f.fleet.queue_size().await >= 2);

    let results = f.fleet.wait_all(Some(Duration::from_secs(10))).await;
    assert_eq!(results.len(), 4);
    assert!(results.values().all(Result::is_ok));

    let completed = f
        .store
        .query(EventQuery::new().kind(EventKind::AgentCompleted).project(&f.project))
        .await
        .unwrap();
    assert_eq!(completed.len(), 4);
}

#[tokio::test]
async fn test_third_invocation_fails_and_stats_reflect_it() {
    let driver = Arc::new(MockDriver::new());
    driver.push_script(MockScript::success("first"));
    driver.push_script(MockScript::success("second"));
    driver.push_script(MockScript::failure("third invocation exploded"));
    let f = fixture(driver.clone(), 4).await;

    for i in 0..3 {
        f.fleet
            .submit(driver.clone(), submission(&format!("task {i}"), PathBuf::from("/tmp")))
            .await
            .unwrap();
    }

    let results = f.fleet.wait_all(Some(Duration::from_secs(10))).await;
    let ok = results.values().filter(|r| r.is_ok()).count();
    let failed = results.values().filter(|r| r.is_err()).count();
    assert_eq!(ok, 2);
    assert_eq!(failed, 1);

    // The failed instance carries a non-empty error.
    let failed_instance = f
        .fleet
        .list_active()
        .await
        .into_iter()
        .find(|i| i.error.is_some())
        .expect("one failed instance");
    assert!(failed_instance.error.unwrap().contains("exploded"));

    let stats = f.store.project_stats(&f.project).await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_agents, 3);
}

#[tokio::test]
async fn test_wait_timeout_then_later_wait_succeeds() {
    let driver = Arc::new(MockDriver::new().with_default(
        MockScript::success("eventually").with_delay(Duration::from_millis(500)),
    ));
    let f = fixture(driver.clone(), 2).await;

    let submitted = f
        .fleet
        .submit(driver, submission("slow task", PathBuf::from("/tmp")))
        .await
        .unwrap();

    let outcome = f
        .fleet
        .wait(submitted.id(), Some(Duration::from_millis(50)))
        .await;
    assert!(matches!(outcome, Err(FleetError::WaitTimeout(_))));

    // The instance subsequently reaches Completed; a later wait
    // returns the result.
    let result = f
        .fleet
        .wait(submitted.id(), Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(result.response, "eventually");
}

#[tokio::test]
async fn test_lifecycle_trace_is_ordered_in_the_log() {
    let driver = Arc::new(MockDriver::new().with_default(
        MockScript::success("traced")
            .with_tool_use("bash", serde_json::json!({"cmd": "ls"}))
            .with_tool_use("edit", serde_json::json!({"file": "x"})),
    ));
    let f = fixture(driver.clone(), 2).await;

    let submitted = f
        .fleet
        .submit(driver, submission("trace me", PathBuf::from("/tmp")))
        .await
        .unwrap();
    f.fleet
        .wait(submitted.id(), Some(Duration::from_secs(10)))
        .await
        .unwrap();

    let timeline = f.store.agent_timeline(submitted.id().as_str()).await.unwrap();
    let kinds: Vec<EventKind> = timeline.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::AgentSpawned,
            EventKind::AgentStarted,
            EventKind::ToolUsed,
            EventKind::ToolUsed,
            EventKind::AgentCompleted,
        ]
    );
}

#[tokio::test]
async fn test_queued_submission_has_observable_id_and_spawned_event() {
    let driver = Arc::new(MockDriver::new().with_default(
        MockScript::success("ok").with_delay(Duration::from_millis(150)),
    ));
    let f = fixture(driver.clone(), 1).await;

    let _running = f
        .fleet
        .submit(driver.clone(), submission("first", PathBuf::from("/tmp")))
        .await
        .unwrap();
    let queued = f
        .fleet
        .submit(driver, submission("second", PathBuf::from("/tmp")))
        .await
        .unwrap();
    assert!(queued.is_queued());

    // Queued work is traceable: status is visible and AgentSpawned is
    // already in the log.
    let status = f.fleet.status(queued.id()).await.unwrap();
    assert!(!status.is_terminal());

    let spawned = f
        .store
        .query(EventQuery::new().kind(EventKind::AgentSpawned).agent_id(queued.id().as_str()))
        .await
        .unwrap();
    assert_eq!(spawned.len(), 1);

    f.fleet
        .wait(queued.id(), Some(Duration::from_secs(10)))
        .await
        .unwrap();
}
