use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};

use crate::engine::workflow::{
    ExecutionId, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
    WorkflowKind,
};
use crate::error::{LeadError, Result};

use super::StepLog;

/// Step log stored in `workflow_executions` / `workflow_steps`.
#[derive(Clone)]
pub struct PostgresStepLog {
    pool: PgPool,
}

impl fmt::Debug for PostgresStepLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStepLog")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresStepLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: PgRow) -> Result<ExecutionRecord> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let input: Json<Value> = row.try_get("input")?;
        let output: Option<Json<Value>> = row.try_get("output")?;
        let parent: Option<String> = row.try_get("parent_id")?;
        let id: String = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(ExecutionRecord {
            id: ExecutionId::from(id),
            kind: WorkflowKind::from_str(&kind).map_err(|_| {
                LeadError::Persistence(format!("unknown workflow kind {kind}"))
            })?,
            parent: parent.map(ExecutionId::from),
            input: input.0,
            status: ExecutionStatus::from_str(&status)?,
            output: output.map(|json| json.0),
            error: row.try_get("error")?,
            created_at,
            updated_at,
        })
    }
}

const EXECUTION_COLUMNS: &str = "id, kind, parent_id, input, status, output, error, created_at, updated_at";

#[async_trait]
impl StepLog for PostgresStepLog {
    async fn begin_execution(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, kind, parent_id, input, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.kind.as_str())
        .bind(record.parent.as_ref().map(ExecutionId::as_str))
        .bind(Json(&record.input))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        );
        sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::decode)
            .transpose()
    }

    async fn set_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_executions SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: &ExecutionId,
        outcome: &ExecutionOutcome<Value>,
    ) -> Result<()> {
        let (output, error) = match outcome {
            ExecutionOutcome::Completed(value) => (Some(Json(value)), None),
            ExecutionOutcome::Failed { error } => (None, Some(error.as_str())),
            ExecutionOutcome::Cancelled => (None, None),
        };

        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, output = $3, error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(outcome.status().as_str())
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_step(
        &self,
        id: &ExecutionId,
        step: &str,
    ) -> Result<Option<Value>> {
        let row = sqlx::query(
            "SELECT output FROM workflow_steps WHERE execution_id = $1 AND step_name = $2",
        )
        .bind(id.as_str())
        .bind(step)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            row.try_get::<Json<Value>, _>("output")
                .map(|json| json.0)
                .map_err(LeadError::from)
        })
        .transpose()
    }

    async fn record_step(
        &self,
        id: &ExecutionId,
        step: &str,
        output: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (execution_id, step_name, output, recorded_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (execution_id, step_name) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(step)
        .bind(Json(output))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn incomplete(&self) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM workflow_executions
            WHERE parent_id IS NULL AND status IN ('queued', 'running')
            ORDER BY created_at ASC
            "#
        );
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }
}
