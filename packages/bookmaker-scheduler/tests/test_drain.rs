//! Queue draining in sync, async and background modes, and how failures
//! surface through each.

mod common;

use bookmaker_scheduler::{
    DrainMode, JobArgs, JobId, JobOutcome, JobState, SchedulerError, StartOutcome,
};
use common::{config, harness, wait_for};

fn retired_outcome(state: Option<JobState>) -> Option<JobOutcome> {
    match state {
        Some(JobState::Retired { outcome, .. }) => Some(outcome),
        _ => None,
    }
}

#[tokio::test]
async fn test_sync_drain_runs_in_order() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    queue.add("book1", "StageA", "a1").unwrap();
    queue.add("book1", "StageB", "b1").unwrap();
    queue.add("book1", "StageB", "b2").unwrap();

    queue.drain(DrainMode::Sync).await.unwrap();

    let finished: Vec<String> = h
        .logs
        .messages("book1")
        .into_iter()
        .filter(|m| m.contains("finished in"))
        .collect();
    assert_eq!(finished.len(), 3);
    assert!(finished[0].starts_with("book1.StageA.a1 finished in "));
    assert!(finished[1].starts_with("book1.StageB.b1 finished in "));
    assert!(finished[2].starts_with("book1.StageB.b2 finished in "));
    assert!(finished[0].ends_with(" minutes"));

    assert_eq!(h.tracker.peak(), 1);
    assert!(!h.scheduler.had_error("book1", None, None));
    assert_eq!(h.scheduler.active_job_count(), 0);
    assert_eq!(h.scheduler.retired().len(), 3);
}

#[tokio::test]
async fn test_sync_drain_skips_past_failures() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    let failing = queue.add("book1", "StageA", "fail").unwrap();
    let next = queue.add("book1", "StageA", "run").unwrap();

    queue.drain(DrainMode::Sync).await.unwrap();

    assert_eq!(retired_outcome(h.scheduler.job_state(&failing)), Some(JobOutcome::Failed));
    assert_eq!(retired_outcome(h.scheduler.job_state(&next)), Some(JobOutcome::Completed));
    assert!(h.scheduler.had_error("book1", Some("StageA"), Some("fail")));
    assert!(h.logs.lines("book1").iter().any(|l| {
        l.level == "error" && l.message.starts_with("book1.StageA.fail encountered an error: ")
    }));
}

#[tokio::test]
async fn test_sync_drain_stops_on_abort() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    queue.add("book1", "StageA", "abort_self").unwrap();
    let never = queue.add("book1", "StageA", "run").unwrap();

    let err = queue.drain(DrainMode::Sync).await.unwrap_err();

    assert!(err.is_abort());
    assert_eq!(h.tracker.calls("book1.StageA.run"), 0);
    assert!(h.scheduler.job_state(&never).is_none());
    assert!(!h.scheduler.is_waiting(&never));
}

#[tokio::test]
async fn test_sync_drain_observes_entity_abort() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    queue.add("book1", "StageA", "a1").unwrap();
    queue.add("book1", "StageB", "b1").unwrap();
    h.scheduler.abort(Some("book1"));

    let err = queue.drain(DrainMode::Sync).await.unwrap_err();

    assert!(err.is_abort());
    assert_eq!(h.tracker.calls("book1.StageA.a1"), 1);
    assert_eq!(h.tracker.calls("book1.StageB.b1"), 0);
}

#[tokio::test]
async fn test_sync_drain_logs_foreign_failure_and_continues() {
    let h = harness(config(4, 4));
    h.scheduler
        .submit(JobId::parse("book1.StageB.fail").unwrap(), JobArgs::new())
        .unwrap();
    h.scheduler.wait_idle().await;

    let mut queue = h.scheduler.new_queue();
    queue.add("book1", "StageA", "a1").unwrap();
    queue.add("book1", "StageA", "run").unwrap();
    queue.drain(DrainMode::Sync).await.unwrap();

    assert_eq!(h.tracker.calls("book1.StageA.run"), 1);
    let reported = h
        .logs
        .lines("book1")
        .iter()
        .filter(|l| l.message.starts_with("book1.StageA.a1 encountered an error"))
        .count();
    assert_eq!(reported, 1);
}

#[tokio::test]
async fn test_async_drain_surfaces_failure() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    queue.add("book1", "StageA", "fail").unwrap();
    queue.add("book2", "StageA", "run").unwrap();

    let err = queue.drain(DrainMode::Async).await.unwrap_err();

    assert!(matches!(err, SchedulerError::StageFailed { .. }));
    assert!(err.to_string().contains("could not read its input"));
    assert!(h.scheduler.had_error("book1", None, None));
    assert!(h.scheduler.had_error("book1", Some("StageA"), None));
    assert!(!h.scheduler.had_error("book1", Some("StageB"), None));
    assert!(!h.scheduler.had_error("book2", None, None));
}

#[tokio::test]
async fn test_failure_propagates_to_dependents() {
    let h = harness(config(4, 4));
    let mut first = h.scheduler.new_queue();
    first.add("book1", "StageA", "fail").unwrap();
    assert!(first.drain(DrainMode::Async).await.is_err());

    let mut dependent = h.scheduler.new_queue();
    dependent.add("book1", "StageB", "run").unwrap();
    assert!(dependent.drain(DrainMode::Async).await.is_err());
}

#[tokio::test]
async fn test_resubmission_clears_stale_failure() {
    let h = harness(config(4, 4));

    let mut first = h.scheduler.new_queue();
    first.add("book1", "StageA", "flaky").unwrap();
    assert!(first.drain(DrainMode::Async).await.is_err());
    assert!(h.scheduler.had_error("book1", None, None));
    h.scheduler.wait_idle().await;

    let mut retry = h.scheduler.new_queue();
    let id = retry.add("book1", "StageA", "flaky").unwrap();
    retry.drain(DrainMode::Async).await.unwrap();

    assert!(!h.scheduler.had_error("book1", None, None));
    assert_eq!(retired_outcome(h.scheduler.job_state(&id)), Some(JobOutcome::Completed));
}

#[tokio::test]
async fn test_worker_panic_is_a_failure() {
    let h = harness(config(4, 4));
    let mut queue = h.scheduler.new_queue();
    let id = queue.add("book1", "StageA", "panic").unwrap();

    let err = queue.drain(DrainMode::Async).await.unwrap_err();

    assert!(err.to_string().contains("panicked"));
    assert_eq!(retired_outcome(h.scheduler.job_state(&id)), Some(JobOutcome::Failed));
    assert_eq!(h.scheduler.active_job_count(), 0);
}

#[tokio::test]
async fn test_sync_drain_panic_releases_budget() {
    let h = harness(config(1, 1));
    let mut queue = h.scheduler.new_queue();
    let exploding = queue.add("book1", "StageA", "panic").unwrap();
    let next = queue.add("book1", "StageB", "run").unwrap();

    queue.drain(DrainMode::Sync).await.unwrap();

    assert_eq!(retired_outcome(h.scheduler.job_state(&exploding)), Some(JobOutcome::Failed));
    assert_eq!(retired_outcome(h.scheduler.job_state(&next)), Some(JobOutcome::Completed));
    assert_eq!(h.tracker.calls("book1.StageB.run"), 1);
    assert_eq!(h.scheduler.active_job_count(), 0);
    assert!(h.scheduler.had_error("book1", Some("StageA"), Some("panic")));
    assert!(h.logs.lines("book1").iter().any(|l| {
        l.level == "error" && l.message.starts_with("book1.StageA.panic encountered an error: ")
    }));

    let later = JobId::parse("book2.StageA.run").unwrap();
    assert_eq!(
        h.scheduler.submit(later.clone(), JobArgs::new()).unwrap(),
        StartOutcome::Started
    );
    h.scheduler.wait_idle().await;
    assert_eq!(retired_outcome(h.scheduler.job_state(&later)), Some(JobOutcome::Completed));
}

#[tokio::test]
async fn test_concurrent_sync_drains_share_a_job() {
    let h = harness(config(4, 4));
    let mut first = h.scheduler.new_queue();
    first.add("book2", "StageA", "run").unwrap();
    first.add("book1", "StageB", "run").unwrap();
    let mut second = h.scheduler.new_queue();
    second.add("book3", "StageA", "slow").unwrap();
    second.add("book1", "StageB", "run").unwrap();

    let (a, b) = tokio::join!(first.drain(DrainMode::Sync), second.drain(DrainMode::Sync));

    a.unwrap();
    b.unwrap();
    assert_eq!(h.tracker.calls("book1.StageB.run"), 2);
    assert!(!h.scheduler.had_error("book1", None, None));
    assert!(!h
        .logs
        .messages("book1")
        .iter()
        .any(|m| m.contains("cancelled by abort")));
    assert_eq!(h.scheduler.active_job_count(), 0);
}

#[tokio::test]
async fn test_background_drain_returns_immediately() {
    let h = harness(config(1, 4));
    let mut queue = h.scheduler.new_queue();
    let first = queue.add("book1", "StageA", "run").unwrap();
    let second = queue.add("book2", "StageA", "run").unwrap();

    let key = queue.drain_in_background(DrainMode::Async);
    assert!(key.starts_with("queue-"));
    assert!(key.ends_with(".drain_queue"));

    let s = h.scheduler.clone();
    let drain_key = key.clone();
    wait_for(move || s.retired().iter().any(|r| r.key == drain_key)).await;

    for id in [first, second] {
        assert_eq!(retired_outcome(h.scheduler.job_state(&id)), Some(JobOutcome::Completed));
    }
    // The drain worker itself does not consume the budget of one.
    assert_eq!(h.tracker.peak(), 1);
    let drain = h
        .scheduler
        .retired()
        .into_iter()
        .find(|r| r.key == key)
        .unwrap();
    assert_eq!(drain.function, "drain_queue");
}

#[tokio::test]
async fn test_shutdown_unblocks_waits() {
    let h = harness(config(4, 4));
    let slow = JobId::parse("book1.StageA.slow").unwrap();
    h.scheduler.submit(slow.clone(), JobArgs::new()).unwrap();

    h.scheduler.shutdown();

    assert!(!h.scheduler.polling().should_poll());
    assert_eq!(h.scheduler.active_job_count(), 0);
    assert_eq!(retired_outcome(h.scheduler.job_state(&slow)), Some(JobOutcome::Destroyed));
    h.scheduler.wait_idle().await;

    // Without polling a sync drain no longer waits for admission.
    let mut queue = h.scheduler.new_queue();
    let late = queue.add("book9", "StageA", "run").unwrap();
    queue.drain(DrainMode::Sync).await.unwrap();
    assert_eq!(retired_outcome(h.scheduler.job_state(&late)), Some(JobOutcome::Completed));
}
