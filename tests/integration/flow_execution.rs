//! Flow execution tests.
//!
//! These tests verify ordering, conditional skipping, failure propagation,
//! retry and cancellation through the public executor API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use shootflow::core::{
    ActionResult, FailureReason, Flow, FlowBuilder, RetryPolicy, TaskHandle, TaskState,
};
use shootflow::orchestration::{execute, ExecutionOutcome, Executor, NoopReporter};
use shootflow::Error;

use crate::fixtures::{Journal, ProgressLog};

/// A (no deps), B (dep A), C (dep A, condition false).
fn abc_flow(journal: &Journal, a_fails: bool) -> Flow {
    let mut builder = FlowBuilder::new("abc");
    let a_action = if a_fails {
        journal.failing_action("a", "boom")
    } else {
        journal.action("a")
    };
    let a = builder.add_task("a", a_action, RetryPolicy::once(), &[]).unwrap();
    builder
        .add_task("b", journal.action("b"), RetryPolicy::once(), &[a])
        .unwrap();
    builder
        .add_conditional_task("c", journal.action("c"), RetryPolicy::once(), false, &[a])
        .unwrap();
    builder.build().unwrap()
}

/// Layered graph used for ordering and idempotence checks.
///
/// Returns the flow and its `(dependency, dependent)` edges by name.
fn layered_flow(journal: &Journal) -> (Flow, Vec<(&'static str, &'static str)>) {
    let edges = vec![
        ("namespace", "service"),
        ("namespace", "backup"),
        ("service", "secrets"),
        ("secrets", "infra"),
        ("backup", "etcd"),
        ("namespace", "etcd"),
        ("infra", "config"),
        ("secrets", "apiserver"),
        ("etcd", "apiserver"),
        ("config", "apiserver"),
        ("apiserver", "scheduler"),
        ("apiserver", "controller"),
        ("config", "controller"),
    ];
    let order = [
        "namespace",
        "service",
        "backup",
        "secrets",
        "infra",
        "etcd",
        "config",
        "apiserver",
        "scheduler",
        "controller",
    ];

    let mut builder = FlowBuilder::new("layered");
    let mut handles: HashMap<&str, TaskHandle> = HashMap::new();
    for name in order {
        let deps: Vec<_> = edges
            .iter()
            .filter(|(_, dependent)| *dependent == name)
            .map(|(dep, _)| handles[dep])
            .collect();
        let handle = builder
            .add_task(name, journal.action(name), RetryPolicy::once(), &deps)
            .unwrap();
        handles.insert(name, handle);
    }
    (builder.build().unwrap(), edges)
}

/// Test: Skipped task does not block dependents
/// Given A, B (dep A) and C (dep A, condition false)
/// When the flow runs
/// Then B runs after A, C is skipped without running, and the flow succeeds
#[tokio::test]
async fn test_skipped_task_succeeds_flow() {
    let journal = Journal::new();
    let outcome = Executor::new(abc_flow(&journal, false)).run().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.state_of("a"), Some(&TaskState::Succeeded));
    assert_eq!(outcome.state_of("b"), Some(&TaskState::Succeeded));
    assert_eq!(outcome.state_of("c"), Some(&TaskState::Skipped));
    assert!(journal.finished_before_start("a", "b"));
    assert!(!journal.started("c"));
    assert!(outcome.description().is_none());
    assert_ok!(outcome.into_result());
}

/// Test: Failure propagates, skip stays
/// Given A fails
/// When the flow runs
/// Then B fails by propagation without running, C stays skipped, and the
/// aggregate names A
#[tokio::test]
async fn test_failure_propagates_past_skipped_sibling() {
    let journal = Journal::new();
    let outcome = Executor::new(abc_flow(&journal, true)).run().await;

    assert!(!outcome.is_success());
    assert_eq!(
        outcome.state_of("b"),
        Some(&TaskState::Failed(FailureReason::DependencyFailed {
            dependency: "a".to_string()
        }))
    );
    assert_eq!(outcome.state_of("c"), Some(&TaskState::Skipped));
    assert!(!journal.started("b"));

    let err = assert_err!(outcome.into_result());
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].0, "a");
    assert!(err.to_string().contains("task 'a' failed: boom"));
}

/// Test: Independent branches keep running
/// Given X fails and an unrelated chain Y1 → Y2
/// When the flow runs
/// Then Y1 and Y2 both succeed while the flow fails naming only X
#[tokio::test]
async fn test_independent_branch_completes_after_failure() {
    let journal = Journal::new();
    let mut builder = FlowBuilder::new("branches");
    builder
        .add_task("x", journal.failing_action("x", "quota exceeded"), RetryPolicy::once(), &[])
        .unwrap();
    let y1 = builder
        .add_task("y1", journal.action("y1"), RetryPolicy::once(), &[])
        .unwrap();
    builder
        .add_task("y2", journal.action("y2"), RetryPolicy::once(), &[y1])
        .unwrap();

    let outcome = execute(builder.build().unwrap(), NoopReporter, CancellationToken::new()).await;

    assert_eq!(outcome.state_of("y1"), Some(&TaskState::Succeeded));
    assert_eq!(outcome.state_of("y2"), Some(&TaskState::Succeeded));
    let err = outcome.error().unwrap();
    assert_eq!(err.failures, vec![("x".to_string(), "quota exceeded".to_string())]);
    assert_eq!(err.cancelled, 0);
}

/// Test: Every failed branch is reported
/// Given two unrelated failing tasks
/// When the flow runs
/// Then the aggregate description mentions both
#[tokio::test]
async fn test_all_failures_aggregated() {
    let journal = Journal::new();
    let mut builder = FlowBuilder::new("two-failures");
    builder
        .add_task("dns", journal.failing_action("dns", "zone missing"), RetryPolicy::once(), &[])
        .unwrap();
    builder
        .add_task("infra", journal.failing_action("infra", "no credentials"), RetryPolicy::once(), &[])
        .unwrap();

    let outcome = Executor::new(builder.build().unwrap()).run().await;

    let description = outcome.description().unwrap();
    assert!(description.contains("task 'dns' failed: zone missing"));
    assert!(description.contains("task 'infra' failed: no credentials"));
    assert_eq!(outcome.failed_count(), 2);
}

/// Test: Dependencies finish before dependents start
/// Given a layered graph with fan-out and fan-in
/// When the flow runs
/// Then for every edge the dependency finished before the dependent started
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependencies_finish_before_dependents_start() {
    let journal = Journal::new();
    let (flow, edges) = layered_flow(&journal);

    let outcome = Executor::new(flow).run().await;

    assert!(outcome.is_success());
    for (dep, dependent) in edges {
        assert!(
            journal.finished_before_start(dep, dependent),
            "{} must finish before {} starts: {:?}",
            dep,
            dependent,
            journal.events()
        );
    }
}

/// Test: Independent tasks run concurrently
/// Given four root tasks that each take 10s and a task depending on all four
/// When the flow runs
/// Then the roots overlap and the whole flow takes two task durations
#[tokio::test(start_paused = true)]
async fn test_independent_tasks_run_concurrently() {
    let slow = |_cancel: CancellationToken| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        ActionResult::Ok(())
    };
    let mut builder = FlowBuilder::new("fan-out");
    let roots: Vec<TaskHandle> = ["dns", "secrets", "backup", "namespace"]
        .into_iter()
        .map(|name| builder.add_task(name, slow, RetryPolicy::once(), &[]).unwrap())
        .collect();
    builder
        .add_task("apiserver", slow, RetryPolicy::once(), &roots)
        .unwrap();

    let started = Instant::now();
    let outcome = Executor::new(builder.build().unwrap()).run().await;
    let elapsed = started.elapsed();

    assert!(outcome.is_success());
    assert!(
        elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21),
        "took {:?}",
        elapsed
    );
}

/// Test: Running the same graph twice is deterministic
/// Given two flows built from the same wiring
/// When both run
/// Then their per-task terminal states are identical
#[tokio::test]
async fn test_same_wiring_same_outcome() {
    async fn run_once() -> ExecutionOutcome {
        let journal = Journal::new();
        Executor::new(abc_flow(&journal, true)).run().await
    }

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first.tasks, second.tasks);
    assert_eq!(first.description(), second.description());
}

/// Test: Progress is monotonic over non-skipped tasks
/// Given a chain of three tasks plus one skipped task
/// When the flow runs
/// Then each settled task reports once, completion never decreases and
/// ends at the total
#[tokio::test]
async fn test_progress_monotonic() {
    let journal = Journal::new();
    let log = ProgressLog::new();
    let mut builder = FlowBuilder::new("chain");
    let first = builder
        .add_task("first", journal.action("first"), RetryPolicy::once(), &[])
        .unwrap();
    let second = builder
        .add_task("second", journal.action("second"), RetryPolicy::once(), &[first])
        .unwrap();
    builder
        .add_conditional_task("gated", journal.action("gated"), RetryPolicy::once(), false, &[first])
        .unwrap();
    builder
        .add_task("third", journal.action("third"), RetryPolicy::once(), &[second])
        .unwrap();

    let outcome = Executor::new(builder.build().unwrap())
        .with_reporter(log.clone())
        .run()
        .await;
    assert!(outcome.is_success());

    let snapshots = log.snapshots();
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.iter().all(|p| p.total == 3 && p.task != "gated"));
    assert!(snapshots.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert_eq!(snapshots.last().map(|p| p.percent()), Some(100));
}

/// Test: Failed flows never report full progress
/// Given A fails and B depends on A
/// When the flow runs
/// Then both settlements are reported without advancing completion
#[tokio::test]
async fn test_progress_on_failure() {
    let journal = Journal::new();
    let log = ProgressLog::new();

    Executor::new(abc_flow(&journal, true))
        .with_reporter(log.clone())
        .run()
        .await;

    let snapshots = log.snapshots();
    let tasks: Vec<&str> = snapshots.iter().map(|p| p.task.as_str()).collect();
    assert_eq!(tasks, vec!["a", "b"]);
    assert!(snapshots.iter().all(|p| p.completed == 0 && p.percent() < 100));
}

/// Test: Retry until success
/// Given an action failing twice with a 30s retry interval
/// When the flow runs
/// Then it succeeds on the third attempt after two intervals
#[tokio::test(start_paused = true)]
async fn test_retry_until_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let mut builder = FlowBuilder::new("flaky");
    builder
        .add_task(
            "wait-for-vpn",
            move |_cancel: CancellationToken| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                futures::future::ready(if n < 3 {
                    ActionResult::Err(anyhow::anyhow!("tunnel not ready"))
                } else {
                    ActionResult::Ok(())
                })
            },
            Duration::from_secs(30),
            &[],
        )
        .unwrap();

    let started = Instant::now();
    let outcome = Executor::new(builder.build().unwrap()).run().await;

    assert!(outcome.is_success());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(60));
}

/// Test: Retry loop honours its timeout
/// Given an always-failing action retried every 10s with a 25s timeout
/// When the flow runs
/// Then it gives up after the third attempt with a timeout failure
#[tokio::test(start_paused = true)]
async fn test_retry_timeout() {
    let mut builder = FlowBuilder::new("stuck");
    builder
        .add_task(
            "deploy-infrastructure",
            |_cancel: CancellationToken| {
                futures::future::ready(ActionResult::Err(anyhow::anyhow!("still pending")))
            },
            RetryPolicy::every(Duration::from_secs(10)).with_timeout(Duration::from_secs(25)),
            &[],
        )
        .unwrap();

    let outcome = Executor::new(builder.build().unwrap()).run().await;

    match outcome.state_of("deploy-infrastructure") {
        Some(TaskState::Failed(FailureReason::TimedOut { attempts, message, .. })) => {
            assert_eq!(*attempts, 3);
            assert_eq!(message, "still pending");
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

/// Test: Cancellation interrupts a retry wait
/// Given A fails forever with a 30s retry and B depends on A
/// When the flow is cancelled at 75s
/// Then A ends cancelled with its last error, B never starts, and the
/// aggregate reports the cancellation
#[tokio::test(start_paused = true)]
async fn test_cancellation_during_retry() {
    let journal = Journal::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let mut builder = FlowBuilder::new("cancellable");
    let a = builder
        .add_task(
            "a",
            move |_cancel: CancellationToken| {
                counter.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(ActionResult::Err(anyhow::anyhow!("not yet")))
            },
            Duration::from_secs(30),
            &[],
        )
        .unwrap();
    builder
        .add_task("b", journal.action("b"), RetryPolicy::once(), &[a])
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(75)).await;
        trigger.cancel();
    });

    let outcome = Executor::new(builder.build().unwrap())
        .with_cancellation(cancel)
        .run()
        .await;

    assert!(outcome.cancelled);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        outcome.state_of("a"),
        Some(&TaskState::Failed(FailureReason::Cancelled {
            last_error: Some("not yet".to_string())
        }))
    );
    assert_eq!(
        outcome.state_of("b"),
        Some(&TaskState::Failed(FailureReason::Cancelled { last_error: None }))
    );
    assert!(!journal.started("b"));
    assert!(outcome
        .description()
        .unwrap()
        .contains("execution cancelled with 2 task(s) unfinished"));
}

/// Test: Handles are bound to their flow
/// Given a handle issued by one builder
/// When it is used as a dependency in another
/// Then registration fails and nothing is added
#[tokio::test]
async fn test_foreign_handle_rejected() {
    let journal = Journal::new();
    let mut first = FlowBuilder::new("first");
    let mut second = FlowBuilder::new("second");
    let handle = assert_ok!(first.add_task("a", journal.action("a"), RetryPolicy::once(), &[]));

    let err = assert_err!(second.add_task("b", journal.action("b"), RetryPolicy::once(), &[handle]));
    assert!(matches!(err, Error::ForeignTaskHandle { .. }));
    assert_eq!(second.task_count(), 0);

    let dup = assert_err!(first.add_task("a", journal.action("a"), RetryPolicy::once(), &[]));
    assert!(matches!(dup, Error::DuplicateTask(name) if name == "a"));
}
