//! Persistent step log backing durable executions.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::InMemoryStepLog;
#[cfg(feature = "database")]
pub use postgres::PostgresStepLog;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::workflow::{
    ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
};

#[async_trait]
pub trait StepLog: Send + Sync {
    /// Inserts the execution header unless one already exists.
    async fn begin_execution(&self, record: &ExecutionRecord) -> Result<()>;

    async fn execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>>;

    async fn set_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()>;

    async fn finish_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome<Value>,
    ) -> Result<()>;

    async fn load_step(
        &self,
        id: &ExecutionId,
        step: &str,
    ) -> Result<Option<Value>>;

    /// Stores a step output. Writing the same step twice keeps the first
    /// output.
    async fn record_step(
        &self,
        id: &ExecutionId,
        step: &str,
        output: &Value,
    ) -> Result<()>;

    /// Root executions that never reached a terminal status.
    async fn incomplete(&self) -> Result<Vec<ExecutionRecord>>;
}
