use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{LeadError, Result};
use crate::engine::workflow::{
    ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
};

use super::StepLog;

#[derive(Debug, Default)]
struct Inner {
    executions: BTreeMap<ExecutionId, ExecutionRecord>,
    steps: HashMap<(ExecutionId, String), Value>,
}

/// Step log kept in process memory. Survives engine restarts within one
/// process, which is what the resume tests rely on.
#[derive(Debug, Default)]
pub struct InMemoryStepLog {
    inner: Mutex<Inner>,
}

impl InMemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the logged steps of one execution, sorted.
    pub async fn steps_of(&self, id: &ExecutionId) -> Vec<String> {
        let guard = self.inner.lock().await;
        let mut names: Vec<String> = guard
            .steps
            .keys()
            .filter(|(execution, _)| execution == id)
            .map(|(_, step)| step.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StepLog for InMemoryStepLog {
    async fn begin_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .executions
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>> {
        Ok(self.inner.lock().await.executions.get(id).cloned())
    }

    async fn set_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let record = guard.executions.get_mut(id).ok_or_else(|| {
            LeadError::NotFound(format!("execution {id}"))
        })?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome<Value>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let record = guard.executions.get_mut(id).ok_or_else(|| {
            LeadError::NotFound(format!("execution {id}"))
        })?;
        record.status = outcome.status();
        match outcome {
            ExecutionOutcome::Completed(value) => {
                record.output = Some(value.clone())
            }
            ExecutionOutcome::Failed { error } => {
                record.error = Some(error.clone())
            }
            ExecutionOutcome::Cancelled => {}
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn load_step(
        &self,
        id: &ExecutionId,
        step: &str,
    ) -> Result<Option<Value>> {
        let guard = self.inner.lock().await;
        Ok(guard.steps.get(&(id.clone(), step.to_string())).cloned())
    }

    async fn record_step(
        &self,
        id: &ExecutionId,
        step: &str,
        output: &Value,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .steps
            .entry((id.clone(), step.to_string()))
            .or_insert_with(|| output.clone());
        Ok(())
    }

    async fn incomplete(&self) -> Result<Vec<ExecutionRecord>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .executions
            .values()
            .filter(|record| record.parent.is_none())
            .filter(|record| !record.status.is_terminal())
            .cloned()
            .collect())
    }
}
