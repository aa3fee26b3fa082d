//! Integration tests for hosted workflows.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::InstanceId;
use saga::{
    InMemorySignalBus, InMemoryTimerService, InstanceState, Invocation, OperationRegistry, RaceOutcome, RetryPolicy,
    SagaDefinition, SagaError, SagaOutcome, Step, StepResult, WorkflowContext, WorkflowHost,
    WorkflowRegistry,
};
use serde_json::{Value, json};

type CallLog = Arc<Mutex<Vec<String>>>;

struct TestHarness {
    host: WorkflowHost,
    timers: InMemoryTimerService,
    signals: InMemorySignalBus,
    calls: CallLog,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_retry(RetryPolicy::none())
    }

    fn with_retry(retry: RetryPolicy) -> Self {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let timers = InMemoryTimerService::new();
        let signals = InMemorySignalBus::new();
        let host = WorkflowHost::builder(operations(&calls), workflows())
            .with_timers(Arc::new(timers.clone()))
            .with_signals(Arc::new(signals.clone()))
            .with_retry_policy(retry)
            .build();
        Self {
            host,
            timers,
            signals,
            calls,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn log(calls: &CallLog, entry: impl Into<String>) {
    calls.lock().unwrap().push(entry.into());
}

fn operations(calls: &CallLog) -> OperationRegistry {
    let mut operations = OperationRegistry::new();

    let c = Arc::clone(calls);
    operations.register("Reserve", move |seats: Vec<u32>| {
        let c = Arc::clone(&c);
        async move {
            log(&c, format!("Reserve {seats:?}"));
            Ok(StepResult::succeeded(json!({ "price": 1000 })))
        }
    });

    let c = Arc::clone(calls);
    operations.register("Release", move |seats: Vec<u32>| {
        let c = Arc::clone(&c);
        async move {
            log(&c, format!("Release {seats:?}"));
            Ok(())
        }
    });

    let c = Arc::clone(calls);
    operations.register("Charge", move |approve: bool| {
        let c = Arc::clone(&c);
        async move {
            log(&c, format!("Charge {approve}"));
            if approve {
                Ok(StepResult::succeeded(json!("tx-1")))
            } else {
                Ok(StepResult::failed())
            }
        }
    });

    let c = Arc::clone(calls);
    operations.register("Refund", move |tx: String| {
        let c = Arc::clone(&c);
        async move {
            log(&c, format!("Refund {tx}"));
            Ok(())
        }
    });

    operations.register("Sleep", |ms: u64| async move {
        tokio::time::sleep(StdDuration::from_millis(ms)).await;
        Ok(ms)
    });

    operations.register("Upper", |s: String| async move { Ok(s.to_uppercase()) });
    operations.register("Exclaim", |s: String| async move { Ok(format!("{s}!")) });

    let attempts = Arc::new(AtomicU32::new(0));
    operations.register("Flaky", move |_: Value| {
        let attempts = Arc::clone(&attempts);
        async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(SagaError::operation_failed("Flaky", format!("attempt {n}")))
            } else {
                Ok(n)
            }
        }
    });

    operations
}

fn booking_saga() -> SagaDefinition {
    SagaDefinition::new("booking")
        .step(
            Step::operation("reserve", "Reserve")
                .with_input(|ctx| Ok(ctx.input()["seats"].clone()))
                .compensate_with_input("Release"),
        )
        .step(
            Step::operation("charge", "Charge")
                .with_input(|ctx| Ok(ctx.input()["approve"].clone()))
                .compensate_with("Refund", |_: bool, tx: String| tx),
        )
}

fn workflows() -> WorkflowRegistry {
    let mut workflows = WorkflowRegistry::new();

    workflows.register("Booking", |ctx: WorkflowContext| async move {
        let input: Value = ctx.input()?;
        ctx.run_saga(&booking_saga(), input).await
    });

    workflows.register("WaitForGo", |ctx: WorkflowContext| async move {
        let deadline = ctx.current_time() + Duration::minutes(1);
        let outcome: RaceOutcome<i64> = ctx.wait_for_event_or_timeout("go", deadline).await?;
        Ok(outcome.into_signal())
    });

    workflows.register("WaitForever", |ctx: WorkflowContext| async move {
        ctx.wait_for_event::<Value>("done").await
    });

    workflows.register("LeakTimer", |ctx: WorkflowContext| async move {
        let _timer = ctx.create_timer(ctx.current_time() + Duration::minutes(5)).await;
        Ok("left a timer behind")
    });

    workflows.register("Echo", |ctx: WorkflowContext| async move {
        let input: Value = ctx.input()?;
        Ok(json!({ "echo": input, "parent": ctx.parent() }))
    });

    workflows.register("Slow", |ctx: WorkflowContext| async move {
        let ms: u64 = ctx.input()?;
        ctx.call_operation::<_, u64>("Sleep", ms).await
    });

    workflows.register("FanOut", |ctx: WorkflowContext| async move {
        let delays: Vec<u64> = ctx.input()?;
        let branches = delays.into_iter().map(|ms| ("Slow", ms)).collect();
        let results = ctx.call_sub_workflows_parallel::<u64, u64>(branches).await?;
        results.into_iter().collect::<Result<Vec<u64>, _>>()
    });

    workflows.register("Shout", |ctx: WorkflowContext| async move {
        let links = [Invocation::operation("Upper"), Invocation::operation("Exclaim")];
        ctx.run_chain(&links, ctx.raw_input().clone()).await
    });

    workflows.register("CallFlaky", |ctx: WorkflowContext| async move {
        ctx.call_operation::<_, u32>("Flaky", Value::Null).await
    });

    workflows.register("TwoBookings", |ctx: WorkflowContext| async move {
        let branches = vec![
            (booking_saga(), json!({ "seats": [1], "approve": true })),
            (booking_saga(), json!({ "seats": [2], "approve": false })),
        ];
        Ok(ctx.run_sagas_parallel(branches).await?.into_inner())
    });

    workflows.register("Uuids", |ctx: WorkflowContext| async move {
        Ok(vec![ctx.new_uuid(), ctx.new_uuid()])
    });

    workflows
}

#[tokio::test]
async fn test_saga_workflow_completes() {
    let h = TestHarness::new();

    let id = h
        .host
        .start("Booking", json!({ "seats": [5, 7], "approve": true }))
        .await
        .unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    let outcome: SagaOutcome = serde_json::from_value(output).unwrap();
    assert!(outcome.succeeded);
    assert_eq!(outcome.result_payload, Some(json!("tx-1")));
    assert_eq!(h.calls(), vec!["Reserve [5, 7]", "Charge true"]);

    let status = h.host.status(&id).await.unwrap().unwrap();
    assert_eq!(status.runtime_status, InstanceState::Completed);
    assert_eq!(status.completed_steps, vec!["reserve", "charge"]);
    assert!(status.compensated_steps.is_empty());
}

#[tokio::test]
async fn test_saga_workflow_rolls_back_completed_steps() {
    let h = TestHarness::new();

    let id = h
        .host
        .start("Booking", json!({ "seats": [5, 7], "approve": false }))
        .await
        .unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    let outcome: SagaOutcome = serde_json::from_value(output).unwrap();
    assert_eq!(outcome, SagaOutcome::failed());
    assert_eq!(
        h.calls(),
        vec!["Reserve [5, 7]", "Charge false", "Release [5, 7]"]
    );

    // A rolled-back saga is a normal result, not an instance failure.
    let status = h.host.status(&id).await.unwrap().unwrap();
    assert_eq!(status.runtime_status, InstanceState::Completed);
    assert_eq!(status.compensated_steps, vec!["reserve"]);
}

#[tokio::test(start_paused = true)]
async fn test_signal_beats_deadline_and_timer_never_fires() {
    let h = TestHarness::new();

    let id = h.host.start("WaitForGo", json!(null)).await.unwrap();
    h.host.raise_event(&id, "go", 42).await.unwrap();

    let output = h.host.wait_for_completion(&id).await.unwrap();
    assert_eq!(output, json!(42));
    assert_eq!(h.timers.canceled_count(), 1);

    tokio::time::sleep(StdDuration::from_secs(300)).await;
    assert_eq!(h.timers.fired_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_beats_signal() {
    let h = TestHarness::new();

    let id = h.host.start("WaitForGo", json!(null)).await.unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    assert_eq!(output, Value::Null);
    assert_eq!(h.timers.fired_count(), 1);

    // The instance is finished; a late signal has nowhere to go.
    let err = h.host.raise_event(&id, "go", 1).await.unwrap_err();
    assert!(matches!(err, SagaError::InstanceNotFound(_)));
}

#[tokio::test]
async fn test_exiting_with_pending_timer_fails_instance() {
    let h = TestHarness::new();

    let id = h.host.start("LeakTimer", json!(null)).await.unwrap();
    let err = h.host.wait_for_completion(&id).await.unwrap_err();

    assert!(err.to_string().contains("pending timer"));
    assert_eq!(h.timers.canceled_count(), 1);
    assert_eq!(h.timers.pending_count(), 0);

    let status = h.host.status(&id).await.unwrap().unwrap();
    assert_eq!(status.runtime_status, InstanceState::Failed);
}

#[tokio::test]
async fn test_sub_workflow_gets_scoped_id() {
    let h = TestHarness::new();
    let mut workflows = workflows();
    workflows.register("Parent", |ctx: WorkflowContext| async move {
        ctx.call_sub_workflow::<_, Value>("Echo", "hi").await
    });
    let host = WorkflowHost::new(operations(&h.calls), workflows);

    let id = host
        .start_with_id("Parent", InstanceId::from_name("p1"), json!(null))
        .await
        .unwrap();
    let output = host.wait_for_completion(&id).await.unwrap();
    assert_eq!(output, json!({ "echo": "hi", "parent": "p1" }));

    let child = InstanceId::from_name("p1:echo-1");
    let status = host.status(&child).await.unwrap().unwrap();
    assert_eq!(status.parent, Some(id.clone()));
    assert_eq!(status.runtime_status, InstanceState::Completed);

    let parent = host.status(&id).await.unwrap().unwrap();
    assert_eq!(parent.children, vec![child]);
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_keeps_branch_order() {
    let h = TestHarness::new();

    let id = h.host.start("FanOut", vec![300u64, 100, 200]).await.unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    assert_eq!(output, json!([300, 100, 200]));
    let status = h.host.status(&id).await.unwrap().unwrap();
    assert_eq!(status.children.len(), 3);
    assert_eq!(status.children[0].as_str(), format!("{id}:slow-1"));
}

#[tokio::test]
async fn test_chain_pipes_outputs() {
    let h = TestHarness::new();

    let id = h.host.start("Shout", "hello").await.unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    assert_eq!(output, json!("HELLO!"));
}

#[tokio::test]
async fn test_parallel_sagas_compensate_independently() {
    let h = TestHarness::new();

    let id = h.host.start("TwoBookings", json!(null)).await.unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    let outcomes: Vec<SagaOutcome> = serde_json::from_value(output).unwrap();
    assert!(outcomes[0].succeeded);
    assert!(!outcomes[1].succeeded);

    let calls = h.calls();
    assert!(calls.contains(&"Release [2]".to_string()));
    assert!(!calls.contains(&"Release [1]".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_host_retries_failed_operations() {
    let h = TestHarness::with_retry(RetryPolicy::fixed(3, StdDuration::from_millis(10)));

    let id = h.host.start("CallFlaky", json!(null)).await.unwrap();
    let output = h.host.wait_for_completion(&id).await.unwrap();

    assert_eq!(output, json!(3));
}

#[tokio::test]
async fn test_without_retry_operation_error_fails_instance() {
    let h = TestHarness::new();

    let id = h.host.start("CallFlaky", json!(null)).await.unwrap();
    let err = h.host.wait_for_completion(&id).await.unwrap_err();

    assert!(matches!(err, SagaError::InstanceFailed { .. }));
    assert!(err.to_string().contains("attempt 1"));
}

#[tokio::test]
async fn test_duplicate_running_id_is_rejected() {
    let h = TestHarness::new();
    let id = InstanceId::from_name("singleton");

    h.host
        .start_with_id("WaitForever", id.clone(), json!(null))
        .await
        .unwrap();
    let err = h
        .host
        .start_with_id("WaitForever", id.clone(), json!(null))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InstanceAlreadyExists(_)));

    h.host.raise_event(&id, "done", "bye").await.unwrap();
    assert_eq!(h.host.wait_for_completion(&id).await.unwrap(), json!("bye"));

    // Finished IDs can be reused.
    h.host
        .start_with_id("Echo", id.clone(), json!(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reused_id_reports_only_the_latest_run() {
    let h = TestHarness::new();
    let id = InstanceId::from_name("reuse");

    h.host
        .start_with_id("Echo", id.clone(), json!("first"))
        .await
        .unwrap();
    h.host.wait_for_completion(&id).await.unwrap();

    h.host
        .start_with_id("WaitForever", id.clone(), json!("wait"))
        .await
        .unwrap();
    let status = h.host.status(&id).await.unwrap().unwrap();
    assert_eq!(status.workflow, "WaitForever");
    assert_eq!(status.runtime_status, InstanceState::Running);
    assert_eq!(status.input, json!("wait"));
    assert!(status.output.is_none());
    assert!(status.failure_reason.is_none());

    h.host.raise_event(&id, "done", "second").await.unwrap();
    assert_eq!(h.host.wait_for_completion(&id).await.unwrap(), json!("second"));
}

#[tokio::test]
async fn test_finished_instances_are_answered_from_history() {
    let h = TestHarness::new();

    let ok = h.host.start("Echo", json!(5)).await.unwrap();
    let first = h.host.wait_for_completion(&ok).await.unwrap();
    let again = h.host.wait_for_completion(&ok).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(again["echo"], json!(5));

    let leaked = h.host.start("LeakTimer", json!(null)).await.unwrap();
    h.host.wait_for_completion(&leaked).await.unwrap_err();
    let err = h.host.wait_for_completion(&leaked).await.unwrap_err();
    assert!(matches!(err, SagaError::InstanceFailed { .. }));
    assert!(err.to_string().contains("pending timer"));
}

#[tokio::test]
async fn test_signal_after_exit_is_rejected_and_not_buffered() {
    let h = TestHarness::new();

    let id = h.host.start("WaitForever", json!(null)).await.unwrap();
    h.host.raise_event(&id, "done", 1).await.unwrap();
    h.host.wait_for_completion(&id).await.unwrap();

    let err = h.host.raise_event(&id, "done", 2).await.unwrap_err();
    assert!(matches!(err, SagaError::InstanceNotFound(_)));
    assert_eq!(h.signals.buffered_count(&id, "done"), 0);
}

#[tokio::test]
async fn test_unknown_names_and_instances() {
    let h = TestHarness::new();

    let err = h.host.start("Nope", json!(null)).await.unwrap_err();
    assert!(matches!(err, SagaError::WorkflowNotFound(_)));

    let ghost = InstanceId::from_name("ghost");
    let err = h.host.raise_event(&ghost, "go", 1).await.unwrap_err();
    assert!(matches!(err, SagaError::InstanceNotFound(_)));
    assert!(h.host.status(&ghost).await.unwrap().is_none());
}

#[tokio::test]
async fn test_new_uuid_is_deterministic_per_instance() {
    let h = TestHarness::new();

    let first = h
        .host
        .start_with_id("Uuids", InstanceId::from_name("u1"), json!(null))
        .await
        .unwrap();
    let a = h.host.wait_for_completion(&first).await.unwrap();
    let again = h
        .host
        .start_with_id("Uuids", InstanceId::from_name("u1"), json!(null))
        .await
        .unwrap();
    let b = h.host.wait_for_completion(&again).await.unwrap();

    assert_eq!(a, b);
    assert_ne!(a[0], a[1]);
}
