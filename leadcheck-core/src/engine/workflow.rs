use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{LeadError, Result};
use crate::events::{CorrelationKey, DomainEvent, EventId, EventName};

use super::context::StepContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    ProcessRun,
    ProcessRunRecord,
    CancelRun,
    RetriggerStuckRecords,
    UpdateRunRecord,
    ValidateEmail,
    EmailValidationApi,
    EmailFindingApi,
    ValidateCompany,
    CompanyValidationApi,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::ProcessRun => "process-run",
            WorkflowKind::ProcessRunRecord => "process-run-record",
            WorkflowKind::CancelRun => "cancel-run",
            WorkflowKind::RetriggerStuckRecords => "retrigger-stuck-records",
            WorkflowKind::UpdateRunRecord => "update-run-record",
            WorkflowKind::ValidateEmail => "validate-email",
            WorkflowKind::EmailValidationApi => "email-validation-api",
            WorkflowKind::EmailFindingApi => "email-finding-api",
            WorkflowKind::ValidateCompany => "validate-company",
            WorkflowKind::CompanyValidationApi => "company-validation-api",
        }
    }

    pub const ALL: [WorkflowKind; 10] = [
        WorkflowKind::ProcessRun,
        WorkflowKind::ProcessRunRecord,
        WorkflowKind::CancelRun,
        WorkflowKind::RetriggerStuckRecords,
        WorkflowKind::UpdateRunRecord,
        WorkflowKind::ValidateEmail,
        WorkflowKind::EmailValidationApi,
        WorkflowKind::EmailFindingApi,
        WorkflowKind::ValidateCompany,
        WorkflowKind::CompanyValidationApi,
    ];
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = LeadError;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                LeadError::InvalidInput(format!("unknown workflow kind {s}"))
            })
    }
}

/// Identity of one workflow execution. Root executions derive it from the
/// triggering event; child executions append the invoking step name to the
/// parent id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn for_event(kind: WorkflowKind, event_id: EventId) -> Self {
        Self(format!("{}:{}", kind.as_str(), event_id))
    }

    pub fn child(&self, step: &str) -> Self {
        Self(format!("{}/{}", self.0, step))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
        )
    }
}

impl FromStr for ExecutionStatus {
    type Err = LeadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(LeadError::Persistence(format!(
                "unknown execution status {other}"
            ))),
        }
    }
}

/// Final state of an execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ExecutionOutcome<T> {
    Completed(T),
    Failed { error: String },
    Cancelled,
}

impl<T> ExecutionOutcome<T> {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Completed(_) => ExecutionStatus::Completed,
            ExecutionOutcome::Failed { .. } => ExecutionStatus::Failed,
            ExecutionOutcome::Cancelled => ExecutionStatus::Cancelled,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            ExecutionOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

impl ExecutionOutcome<Value> {
    pub fn decode<T: DeserializeOwned>(self) -> Result<ExecutionOutcome<T>> {
        Ok(match self {
            ExecutionOutcome::Completed(value) => {
                ExecutionOutcome::Completed(serde_json::from_value(value)?)
            }
            ExecutionOutcome::Failed { error } => {
                ExecutionOutcome::Failed { error }
            }
            ExecutionOutcome::Cancelled => ExecutionOutcome::Cancelled,
        })
    }
}

/// Persisted header of an execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub kind: WorkflowKind,
    pub parent: Option<ExecutionId>,
    pub input: Value,
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn queued(
        id: ExecutionId,
        kind: WorkflowKind,
        parent: Option<ExecutionId>,
        input: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            parent,
            input,
            status: ExecutionStatus::Queued,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Outcome of a terminal execution.
    pub fn outcome(&self) -> Option<ExecutionOutcome<Value>> {
        match self.status {
            ExecutionStatus::Completed => Some(ExecutionOutcome::Completed(
                self.output.clone().unwrap_or(Value::Null),
            )),
            ExecutionStatus::Failed => Some(ExecutionOutcome::Failed {
                error: self.error.clone().unwrap_or_default(),
            }),
            ExecutionStatus::Cancelled => Some(ExecutionOutcome::Cancelled),
            ExecutionStatus::Queued | ExecutionStatus::Running => None,
        }
    }
}

/// A durable, event-triggered workflow definition.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn kind(&self) -> WorkflowKind;

    /// Event that starts this workflow.
    fn trigger(&self) -> EventName;

    /// Extracts the input from a trigger event, or `None` when the event is
    /// not for this workflow.
    fn accept(&self, event: &DomainEvent) -> Option<Self::Input>;

    /// Event and correlation key that cancel a running execution.
    fn cancel_on(&self, _input: &Self::Input) -> Option<(EventName, CorrelationKey)> {
        None
    }

    async fn run(&self, ctx: &StepContext, input: Self::Input) -> Result<Self::Output>;

    /// Called once after the execution fails for good (retries exhausted,
    /// permanent error, or timeout). Not called for cancellations.
    async fn on_failure(&self, _input: &Self::Input, _error: &LeadError) -> Result<()> {
        Ok(())
    }
}
