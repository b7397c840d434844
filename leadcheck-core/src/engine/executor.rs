use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    sync::{Mutex, watch},
    time::Instant,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{LeadError, Result};
use crate::events::{EventEnvelope, EventHandler, EventObserver};

use super::{
    cancel::CancellationRegistry,
    config::{EngineConfig, WorkflowLimits},
    context::StepContext,
    gate::{ConcurrencyGates, GatePermit},
    step_log::StepLog,
    workflow::{
        ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
        Workflow, WorkflowKind,
    },
};

type OutcomeSlot = watch::Receiver<Option<ExecutionOutcome<Value>>>;

struct EngineInner {
    config: EngineConfig,
    log: Arc<dyn StepLog>,
    gates: ConcurrencyGates,
    cancellations: CancellationRegistry,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    active: Mutex<HashMap<ExecutionId, OutcomeSlot>>,
}

/// Runs workflow executions against a shared step log.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("gates", &self.inner.gates)
            .field("in_flight", &self.inner.tasks.len())
            .field("shutting_down", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

/// Awaitable result of an execution started with
/// [`WorkflowEngine::execute`].
pub struct ExecutionHandle<T> {
    id: ExecutionId,
    slot: OutcomeSlot,
    _output: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ExecutionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("finished", &self.slot.borrow().is_some())
            .finish()
    }
}

impl<T: DeserializeOwned> ExecutionHandle<T> {
    fn pending(id: ExecutionId, slot: OutcomeSlot) -> Self {
        Self {
            id,
            slot,
            _output: PhantomData,
        }
    }

    fn resolved(id: ExecutionId, outcome: ExecutionOutcome<Value>) -> Self {
        let (_, slot) = watch::channel(Some(outcome));
        Self::pending(id, slot)
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// Waits for the execution to reach a terminal state.
    pub async fn outcome(mut self) -> Result<ExecutionOutcome<T>> {
        let outcome = self
            .slot
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                LeadError::Internal(format!(
                    "execution {} ended without an outcome",
                    self.id
                ))
            })?
            .clone();

        outcome
            .ok_or_else(|| {
                LeadError::Internal(format!("execution {} has no outcome", self.id))
            })?
            .decode()
    }
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, log: Arc<dyn StepLog>) -> Self {
        let gates = ConcurrencyGates::from_config(&config);
        Self {
            inner: Arc::new(EngineInner {
                config,
                log,
                gates,
                cancellations: CancellationRegistry::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn step_log(&self) -> &Arc<dyn StepLog> {
        &self.inner.log
    }

    pub fn gates(&self) -> &ConcurrencyGates {
        &self.inner.gates
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.inner.cancellations
    }

    /// Number of root executions currently tracked.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Starts an execution in the background.
    ///
    /// Idempotent per execution id: an id that is already running returns a
    /// handle to the running execution, an id that already finished returns
    /// its stored outcome, and an id left unfinished by an earlier process
    /// resumes from its first unlogged step.
    pub async fn execute<W: Workflow>(
        &self,
        workflow: Arc<W>,
        id: ExecutionId,
        input: W::Input,
    ) -> Result<ExecutionHandle<W::Output>> {
        let mut active = self.inner.active.lock().await;

        if let Some(slot) = active.get(&id) {
            debug!(execution_id = %id, "execution already active");
            return Ok(ExecutionHandle::pending(id, slot.clone()));
        }

        if let Some(existing) = self.inner.log.execution(&id).await? {
            if let Some(outcome) = existing.outcome() {
                debug!(execution_id = %id, status = existing.status.as_str(), "execution already finished");
                return Ok(ExecutionHandle::resolved(id, outcome));
            }
            info!(execution_id = %id, "resuming unfinished execution");
        }

        let record = ExecutionRecord::queued(
            id.clone(),
            workflow.kind(),
            None,
            serde_json::to_value(&input)?,
        );
        self.inner.log.begin_execution(&record).await?;

        let (tx, slot) = watch::channel(None);
        active.insert(id.clone(), slot.clone());
        drop(active);

        let engine = self.clone();
        let token = self.inner.shutdown.child_token();
        let span = info_span!(
            "execution",
            workflow = %workflow.kind(),
            execution_id = %id
        );
        let task_id = id.clone();
        self.inner.tasks.spawn(
            async move {
                let outcome =
                    engine.drive(workflow.as_ref(), &task_id, input, token).await;
                engine.inner.active.lock().await.remove(&task_id);
                let _ = tx.send(Some(outcome));
            }
            .instrument(span),
        );

        Ok(ExecutionHandle::pending(id, slot))
    }

    /// Runs a child execution inline, under a token derived from the
    /// parent's so cancelling the parent cancels the child.
    pub(crate) async fn run_child<W: Workflow>(
        &self,
        workflow: &W,
        id: ExecutionId,
        parent: &ExecutionId,
        input: W::Input,
        parent_token: &CancellationToken,
    ) -> Result<ExecutionOutcome<Value>> {
        if let Some(existing) = self.inner.log.execution(&id).await?
            && let Some(outcome) = existing.outcome()
        {
            return Ok(outcome);
        }

        let record = ExecutionRecord::queued(
            id.clone(),
            workflow.kind(),
            Some(parent.clone()),
            serde_json::to_value(&input)?,
        );
        self.inner.log.begin_execution(&record).await?;

        let span = info_span!(
            "child",
            workflow = %workflow.kind(),
            execution_id = %id
        );
        Ok(self
            .drive(workflow, &id, input, parent_token.child_token())
            .instrument(span)
            .await)
    }

    async fn drive<W: Workflow>(
        &self,
        workflow: &W,
        id: &ExecutionId,
        input: W::Input,
        token: CancellationToken,
    ) -> ExecutionOutcome<Value> {
        let kind = workflow.kind();
        let limits = *self.inner.config.limits(kind);

        let subscription = workflow.cancel_on(&input);
        if let Some((event, key)) = subscription {
            self.inner
                .cancellations
                .register(event, key, id.clone(), token.clone())
                .await;
        }

        let result = self
            .run_gated(workflow, id, input.clone(), &token, limits)
            .await;

        if let Some((event, key)) = subscription {
            self.inner.cancellations.deregister(event, key, id).await;
        }

        let outcome = match result {
            Ok(output) => match serde_json::to_value(&output) {
                Ok(value) => {
                    debug!("execution completed");
                    ExecutionOutcome::Completed(value)
                }
                Err(err) => ExecutionOutcome::Failed {
                    error: LeadError::from(err).to_string(),
                },
            },
            Err(err) if err.is_cancellation() => {
                info!(reason = %err, "execution cancelled");
                ExecutionOutcome::Cancelled
            }
            Err(err) => {
                warn!(error = %err, "execution failed");
                if let Err(hook_err) = workflow.on_failure(&input, &err).await {
                    error!(error = %hook_err, "failure hook failed");
                }
                ExecutionOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        if self.inner.shutdown.is_cancelled()
            && matches!(outcome, ExecutionOutcome::Cancelled)
        {
            info!("execution interrupted by shutdown; left for resume");
            return outcome;
        }

        if let Err(err) = self.inner.log.finish_execution(id, &outcome).await {
            error!(error = %err, "failed to persist execution outcome");
        }
        outcome
    }

    async fn run_gated<W: Workflow>(
        &self,
        workflow: &W,
        id: &ExecutionId,
        input: W::Input,
        token: &CancellationToken,
        limits: WorkflowLimits,
    ) -> Result<W::Output> {
        let kind = workflow.kind();
        let permit = self.wait_for_slot(kind, id, token, &limits).await?;

        self.inner.log.set_status(id, ExecutionStatus::Running).await?;
        let deadline = limits.finish_timeout().map(|limit| Instant::now() + limit);
        let ctx = StepContext::new(self.clone(), id.clone(), kind, token.clone(), deadline);

        let run = workflow.run(&ctx, input);
        let result = match limits.finish_timeout() {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(LeadError::TimedOut(format!(
                    "{id} did not finish within {limit:?}"
                ))),
            },
            None => run.await,
        };

        drop(permit);
        result
    }

    async fn wait_for_slot(
        &self,
        kind: WorkflowKind,
        id: &ExecutionId,
        token: &CancellationToken,
        limits: &WorkflowLimits,
    ) -> Result<GatePermit> {
        let acquire = self.inner.gates.acquire(kind);

        let waiting = async {
            match limits.start_timeout() {
                Some(limit) => match tokio::time::timeout(limit, acquire).await {
                    Ok(acquired) => acquired,
                    Err(_) => Err(LeadError::TimedOut(format!(
                        "{id} did not start within {limit:?}"
                    ))),
                },
                None => acquire.await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(LeadError::Cancelled(format!(
                "{id} cancelled before it started"
            ))),
            acquired = waiting => acquired,
        }
    }

    /// Stops accepting work, cancels running executions at their next step
    /// boundary, and waits for them. Interrupted executions stay unfinished
    /// in the step log.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Waits until every execution started so far has finished.
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

#[async_trait]
impl EventObserver for WorkflowEngine {
    async fn observe(&self, envelope: &EventEnvelope) {
        let Some(key) = envelope.event.correlation_key() else {
            return;
        };
        let cancelled = self
            .inner
            .cancellations
            .cancel(envelope.name(), key)
            .await;
        if cancelled > 0 {
            info!(
                event = %envelope.name(),
                correlation = %key,
                cancelled,
                "cancellation event matched running executions"
            );
        }
    }
}

/// Router subscription that turns a trigger event into an execution whose
/// id is derived from the event id, so redelivery never starts a second
/// execution.
pub struct WorkflowTrigger<W> {
    engine: WorkflowEngine,
    workflow: Arc<W>,
}

impl<W> fmt::Debug for WorkflowTrigger<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowTrigger").finish_non_exhaustive()
    }
}

impl<W: Workflow> WorkflowTrigger<W> {
    pub fn new(engine: WorkflowEngine, workflow: Arc<W>) -> Self {
        Self { engine, workflow }
    }
}

#[async_trait]
impl<W: Workflow> EventHandler for WorkflowTrigger<W> {
    fn label(&self) -> &str {
        self.workflow.kind().as_str()
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let input = self.workflow.accept(&envelope.event).ok_or_else(|| {
            LeadError::UnknownEvent(format!(
                "{} does not accept {}",
                self.workflow.kind(),
                envelope.name()
            ))
        })?;
        let id = ExecutionId::for_event(self.workflow.kind(), envelope.id);
        self.engine
            .execute(Arc::clone(&self.workflow), id, input)
            .await?;
        Ok(())
    }
}
