use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use leadcheck_core::{
    LeadError,
    engine::{
        EngineConfig, ExecutionId, ExecutionOutcome, ExecutionRecord,
        ExecutionStatus, InMemoryStepLog, RetryPolicy, StepContext, StepLog,
        Workflow, WorkflowEngine, WorkflowKind, WorkflowLimits,
    },
    error::Result,
    events::{
        CorrelationKey, DomainEvent, EventEnvelope, EventName, EventObserver,
        RecordQueued, RecordRef,
    },
};
use leadcheck_model::RunRecordId;
use serde_json::json;

/// Two-step workflow that counts how often each step body runs.
#[derive(Debug, Default)]
struct Probe {
    first_calls: AtomicUsize,
    second_calls: AtomicUsize,
    failures_left: AtomicUsize,
    permanent: bool,
    first_delay: Duration,
    failure_hooks: AtomicUsize,
}

impl Probe {
    fn slow(delay: Duration) -> Self {
        Self {
            first_delay: delay,
            ..Self::default()
        }
    }

    fn flaky(failures: usize, permanent: bool) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            permanent,
            ..Self::default()
        }
    }

    fn first_calls(&self) -> usize {
        self.first_calls.load(Ordering::SeqCst)
    }

    fn second_calls(&self) -> usize {
        self.second_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Workflow for Probe {
    type Input = RecordQueued;
    type Output = usize;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ProcessRunRecord
    }

    fn trigger(&self) -> EventName {
        EventName::RecordQueued
    }

    fn accept(&self, event: &DomainEvent) -> Option<RecordQueued> {
        match event {
            DomainEvent::RecordQueued(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn cancel_on(&self, input: &RecordQueued) -> Option<(EventName, CorrelationKey)> {
        Some((
            EventName::RecordCancelled,
            CorrelationKey::RunRecord(input.run_record_id),
        ))
    }

    async fn run(&self, ctx: &StepContext, _input: RecordQueued) -> Result<usize> {
        let probe = self;
        let first: usize = ctx
            .run("first", move || async move {
                probe.first_calls.fetch_add(1, Ordering::SeqCst);
                if !probe.first_delay.is_zero() {
                    tokio::time::sleep(probe.first_delay).await;
                }
                if probe.failures_left.load(Ordering::SeqCst) > 0 {
                    probe.failures_left.fetch_sub(1, Ordering::SeqCst);
                    return Err(if probe.permanent {
                        LeadError::InvalidInput("bad record".into())
                    } else {
                        LeadError::Persistence("connection reset".into())
                    });
                }
                Ok(1)
            })
            .await?;
        let second: usize = ctx
            .run("second", move || async move {
                probe.second_calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await?;
        Ok(first + second)
    }

    async fn on_failure(&self, _input: &RecordQueued, _error: &LeadError) -> Result<()> {
        self.failure_hooks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Invokes a [`Probe`] as a child execution.
#[derive(Debug)]
struct Parent {
    child: Arc<Probe>,
}

#[async_trait]
impl Workflow for Parent {
    type Input = RecordQueued;
    type Output = usize;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ProcessRun
    }

    fn trigger(&self) -> EventName {
        EventName::RunQueued
    }

    fn accept(&self, _event: &DomainEvent) -> Option<RecordQueued> {
        None
    }

    async fn run(&self, ctx: &StepContext, input: RecordQueued) -> Result<usize> {
        let total = ctx.invoke("probe", self.child.as_ref(), input).await?;
        Ok(total * 10)
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry = RetryPolicy::fixed(4, Duration::ZERO);
    config
}

fn input() -> RecordQueued {
    RecordQueued {
        run_record_id: RunRecordId::new(),
        ignore_cache: false,
    }
}

fn engine_with(config: EngineConfig) -> (WorkflowEngine, Arc<InMemoryStepLog>) {
    let log = Arc::new(InMemoryStepLog::new());
    (WorkflowEngine::new(config, log.clone()), log)
}

#[tokio::test]
async fn resumed_execution_skips_logged_steps() {
    let (engine, log) = engine_with(config());
    let probe = Arc::new(Probe::default());
    let id = ExecutionId::from("process-run-record:resume");
    let input = input();

    log.begin_execution(&ExecutionRecord::queued(
        id.clone(),
        WorkflowKind::ProcessRunRecord,
        None,
        serde_json::to_value(&input).expect("input"),
    ))
    .await
    .expect("begin");
    log.record_step(&id, "first", &json!(1)).await.expect("step");

    let outcome = engine
        .execute(probe.clone(), id.clone(), input)
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert_eq!(outcome, ExecutionOutcome::Completed(3));
    assert_eq!(probe.first_calls(), 0);
    assert_eq!(probe.second_calls(), 1);
    assert_eq!(log.steps_of(&id).await, vec!["first", "second"]);
}

#[tokio::test]
async fn finished_execution_ids_are_not_run_twice() {
    let (engine, _log) = engine_with(config());
    let probe = Arc::new(Probe::default());
    let id = ExecutionId::from("process-run-record:dedupe");
    let input = input();

    let first = engine
        .execute(probe.clone(), id.clone(), input.clone())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");
    let second = engine
        .execute(probe.clone(), id, input)
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert_eq!(first, second);
    assert_eq!(probe.first_calls(), 1);
    assert_eq!(probe.second_calls(), 1);
}

#[tokio::test]
async fn transient_step_errors_are_retried() {
    let (engine, _log) = engine_with(config());
    let probe = Arc::new(Probe::flaky(2, false));

    let outcome = engine
        .execute(probe.clone(), ExecutionId::from("flaky"), input())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert_eq!(outcome, ExecutionOutcome::Completed(3));
    assert_eq!(probe.first_calls(), 3);
}

#[tokio::test]
async fn retries_stop_after_the_configured_maximum() {
    let (engine, log) = engine_with(config());
    let probe = Arc::new(Probe::flaky(100, false));
    let id = ExecutionId::from("exhausted");

    let outcome = engine
        .execute(probe.clone(), id.clone(), input())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    assert_eq!(probe.first_calls(), 5);
    assert_eq!(probe.second_calls(), 0);
    assert_eq!(probe.failure_hooks.load(Ordering::SeqCst), 1);
    let record = log.execution(&id).await.expect("load").expect("exists");
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn permanent_step_errors_are_not_retried() {
    let (engine, _log) = engine_with(config());
    let probe = Arc::new(Probe::flaky(1, true));

    let outcome = engine
        .execute(probe.clone(), ExecutionId::from("permanent"), input())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    match outcome {
        ExecutionOutcome::Failed { error } => assert!(error.contains("bad record")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(probe.first_calls(), 1);
}

#[tokio::test]
async fn correlated_event_cancels_at_the_next_step_boundary() {
    let (engine, log) = engine_with(config());
    let probe = Arc::new(Probe::slow(Duration::from_millis(100)));
    let input = input();
    let id = ExecutionId::from("cancel-me");

    let handle = engine
        .execute(probe.clone(), id.clone(), input.clone())
        .await
        .expect("execute");
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine
        .observe(&EventEnvelope::new(DomainEvent::RecordCancelled(RecordRef {
            run_record_id: input.run_record_id,
        })))
        .await;

    let outcome = handle.outcome().await.expect("outcome");
    assert_eq!(outcome, ExecutionOutcome::Cancelled);
    assert_eq!(probe.first_calls(), 1, "the running step completes");
    assert_eq!(probe.second_calls(), 0);
    assert_eq!(probe.failure_hooks.load(Ordering::SeqCst), 0);

    let record = log.execution(&id).await.expect("load").expect("exists");
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(engine.cancellations().is_empty().await);
}

#[tokio::test]
async fn start_timeout_fails_executions_stuck_behind_the_gate() {
    let mut config = config();
    config.record = WorkflowLimits {
        concurrency: Some(1),
        start_timeout_ms: Some(50),
        finish_timeout_ms: None,
    };
    let (engine, _log) = engine_with(config);
    let blocker = Arc::new(Probe::slow(Duration::from_millis(300)));
    let waiter = Arc::new(Probe::default());

    let blocking = engine
        .execute(blocker.clone(), ExecutionId::from("blocker"), input())
        .await
        .expect("execute");
    let waiting = engine
        .execute(waiter.clone(), ExecutionId::from("waiter"), input())
        .await
        .expect("execute");

    match waiting.outcome().await.expect("outcome") {
        ExecutionOutcome::Failed { error } => {
            assert!(error.contains("did not start"), "{error}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(waiter.first_calls(), 0);
    assert_eq!(waiter.failure_hooks.load(Ordering::SeqCst), 1);
    assert_eq!(
        blocking.outcome().await.expect("outcome"),
        ExecutionOutcome::Completed(3)
    );
}

#[tokio::test]
async fn finish_timeout_is_fatal() {
    let mut config = config();
    config.record.finish_timeout_ms = Some(50);
    let (engine, _log) = engine_with(config);
    let probe = Arc::new(Probe::slow(Duration::from_millis(300)));

    let outcome = engine
        .execute(probe.clone(), ExecutionId::from("slow"), input())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    match outcome {
        ExecutionOutcome::Failed { error } => {
            assert!(error.contains("did not finish"), "{error}")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(probe.first_calls(), 1);
    assert_eq!(probe.second_calls(), 0);
}

#[tokio::test]
async fn child_output_is_logged_under_the_parent() {
    let (engine, log) = engine_with(config());
    let child = Arc::new(Probe::default());
    let parent = Arc::new(Parent {
        child: child.clone(),
    });
    let id = ExecutionId::from("process-run:parent");

    let outcome = engine
        .execute(parent, id.clone(), input())
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert_eq!(outcome, ExecutionOutcome::Completed(30));
    assert_eq!(log.steps_of(&id).await, vec!["probe"]);
    let child_record = log
        .execution(&id.child("probe"))
        .await
        .expect("load")
        .expect("child exists");
    assert_eq!(child_record.status, ExecutionStatus::Completed);
    assert_eq!(child_record.parent, Some(id));
}

#[tokio::test]
async fn shutdown_leaves_interrupted_executions_resumable() {
    let log = Arc::new(InMemoryStepLog::new());
    let probe = Arc::new(Probe::slow(Duration::from_millis(100)));
    let id = ExecutionId::from("process-run-record:interrupted");
    let input = input();

    let engine = WorkflowEngine::new(config(), log.clone());
    engine
        .execute(probe.clone(), id.clone(), input.clone())
        .await
        .expect("execute");
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;

    let interrupted = log.execution(&id).await.expect("load").expect("exists");
    assert_eq!(interrupted.status, ExecutionStatus::Running);
    assert_eq!(log.incomplete().await.expect("incomplete").len(), 1);

    let restarted = WorkflowEngine::new(config(), log.clone());
    let outcome = restarted
        .execute(probe.clone(), id.clone(), input)
        .await
        .expect("execute")
        .outcome()
        .await
        .expect("outcome");

    assert_eq!(outcome, ExecutionOutcome::Completed(3));
    assert_eq!(probe.first_calls(), 1);
    assert_eq!(probe.second_calls(), 1);
    assert!(log.incomplete().await.expect("incomplete").is_empty());
}
