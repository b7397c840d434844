use std::{collections::HashMap, fmt, future::Future};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LeadError, Result};

use super::{
    config::RetryPolicy,
    executor::WorkflowEngine,
    workflow::{ExecutionId, ExecutionOutcome, Workflow, WorkflowKind},
};

/// Handle a running workflow uses to execute durable steps.
///
/// Cancellation and the finish deadline are only observed here, at step
/// boundaries: before a step that has no logged output and between retry
/// attempts. A step body that is already running always completes.
pub struct StepContext {
    engine: WorkflowEngine,
    execution_id: ExecutionId,
    kind: WorkflowKind,
    token: CancellationToken,
    deadline: Option<Instant>,
    retry: RetryPolicy,
    seen: Mutex<HashMap<String, u32>>,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("execution_id", &self.execution_id)
            .field("kind", &self.kind)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl StepContext {
    pub(crate) fn new(
        engine: WorkflowEngine,
        execution_id: ExecutionId,
        kind: WorkflowKind,
        token: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        let retry = engine.config().retry;
        Self {
            engine,
            execution_id,
            kind,
            token,
            deadline,
            retry,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with `Cancelled` or `TimedOut` when the execution must stop.
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(LeadError::Cancelled(format!(
                "{} cancelled",
                self.execution_id
            )));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(LeadError::TimedOut(format!(
                "{} exceeded its finish timeout",
                self.execution_id
            )));
        }
        Ok(())
    }

    /// Repeated names within one execution get a `:n` suffix so loops can
    /// reuse a name and still replay deterministically.
    async fn step_key(&self, name: &str) -> String {
        let mut seen = self.seen.lock().await;
        let count = seen.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            name.to_string()
        } else {
            format!("{name}:{count}")
        }
    }

    /// Runs a durable step with the engine's default retry policy.
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.run_with_policy(name, self.retry, f).await
    }

    /// Runs a durable step. A logged output is returned without running the
    /// body again; transient errors are retried up to `policy.max_retries`
    /// times and anything else fails the step immediately.
    pub async fn run_with_policy<T, F, Fut>(
        &self,
        name: &str,
        policy: RetryPolicy,
        mut f: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let step = self.step_key(name).await;
        let log = self.engine.step_log();

        if let Some(logged) = log.load_step(&self.execution_id, &step).await? {
            debug!(step = %step, "replaying logged step");
            return Ok(serde_json::from_value(logged)?);
        }

        let mut attempt: u32 = 0;
        loop {
            self.checkpoint()?;
            attempt += 1;

            match f().await {
                Ok(output) => {
                    let value = serde_json::to_value(&output)?;
                    log.record_step(&self.execution_id, &step, &value).await?;
                    return Ok(output);
                }
                Err(err) if err.is_transient() && attempt <= policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        step = %step,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "step failed; retrying"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    warn!(step = %step, attempt, error = %err, "step failed");
                    return Err(err);
                }
            }
        }
    }

    /// Runs `workflow` as a child execution and logs its output as this
    /// step's output. A failed child fails the step permanently; its own
    /// steps already had their retries.
    pub async fn invoke<W: Workflow>(
        &self,
        name: &str,
        workflow: &W,
        input: W::Input,
    ) -> Result<W::Output> {
        let step = self.step_key(name).await;
        let log = self.engine.step_log();

        if let Some(logged) = log.load_step(&self.execution_id, &step).await? {
            debug!(step = %step, "replaying logged child output");
            return Ok(serde_json::from_value(logged)?);
        }
        self.checkpoint()?;

        let child_id = self.execution_id.child(&step);
        let outcome = self
            .engine
            .run_child(workflow, child_id, &self.execution_id, input, &self.token)
            .await?;

        match outcome {
            ExecutionOutcome::Completed(value) => {
                log.record_step(&self.execution_id, &step, &value).await?;
                Ok(serde_json::from_value(value)?)
            }
            ExecutionOutcome::Failed { error } => Err(LeadError::ChildFailed {
                workflow: workflow.kind().to_string(),
                error,
            }),
            ExecutionOutcome::Cancelled => Err(LeadError::Cancelled(format!(
                "{} cancelled while {} was running",
                self.execution_id,
                workflow.kind()
            ))),
        }
    }
}
