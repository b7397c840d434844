use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadcheck_model::{
    CompanyVerdict, EmailVerdict, Lead, Run, RunFlags, RunId, RunRecord,
    RunRecordId, RunRecordStatus, RunStatus,
};
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row, migrate::Migrator, postgres::PgRow,
    types::Json,
};
use uuid::Uuid;

use crate::error::Result;

use super::repository::{
    Guard, RecordPatch, RecordQuery, RunRepository, StatusFilter,
};

/// Schema for runs, records, validator caches and the step log.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const RECORD_COLUMNS: &str = "id, run_id, lead, status, regex_valid, \
    email_validation_result, email_finding_result, company_validation_result, \
    failure_reason, correlation_id, updated_at";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

#[derive(Clone)]
pub struct PostgresRunRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresRunRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRunRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn decode_run(row: PgRow) -> Result<Run> {
        let status: String = row.try_get("status")?;
        Ok(Run {
            id: RunId(row.try_get::<Uuid, _>("id")?),
            status: RunStatus::from_str(&status)?,
            flags: RunFlags {
                skip_email_validation: row.try_get("skip_email_validation")?,
                ignore_cache: row.try_get("ignore_cache")?,
            },
            requirement: row.try_get("requirement")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    fn decode_record(row: PgRow) -> Result<RunRecord> {
        let status: String = row.try_get("status")?;
        let lead: Json<Lead> = row.try_get("lead")?;
        let email_validation: Option<Json<EmailVerdict>> =
            row.try_get("email_validation_result")?;
        let email_finding: Option<Json<EmailVerdict>> =
            row.try_get("email_finding_result")?;
        let company: Option<Json<CompanyVerdict>> =
            row.try_get("company_validation_result")?;

        Ok(RunRecord {
            id: RunRecordId(row.try_get::<Uuid, _>("id")?),
            run_id: RunId(row.try_get::<Uuid, _>("run_id")?),
            lead: lead.0,
            status: RunRecordStatus::from_str(&status)?,
            regex_valid: row.try_get("regex_valid")?,
            email_validation_result: email_validation.map(|json| json.0),
            email_finding_result: email_finding.map(|json| json.0),
            company_validation_result: company.map(|json| json.0),
            failure_reason: row.try_get("failure_reason")?,
            correlation_id: row.try_get("correlation_id")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: StatusFilter) {
        match filter {
            StatusFilter::Any => {}
            StatusFilter::Eq(status) => {
                builder.push(" AND status = ");
                builder.push_bind(status.as_str());
            }
            StatusFilter::NotEq(status) => {
                builder.push(" AND status <> ");
                builder.push_bind(status.as_str());
            }
            StatusFilter::NonTerminal => {
                builder.push(" AND status NOT IN ");
                builder.push(TERMINAL_STATUSES);
            }
        }
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn insert_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs
                (id, status, skip_email_validation, ignore_cache, requirement, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id.to_uuid())
        .bind(run.status.as_str())
        .bind(run.flags.skip_email_validation)
        .bind(run.flags.ignore_cache)
        .bind(run.requirement.as_deref())
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        sqlx::query(
            r#"
            SELECT id, status, skip_email_validation, ignore_cache, requirement, created_at, updated_at
            FROM runs WHERE id = $1
            "#,
        )
        .bind(id.to_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::decode_run)
        .transpose()
    }

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<()> {
        sqlx::query("UPDATE runs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.to_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_run_status_if(
        &self,
        id: RunId,
        status: RunStatus,
        from: &[RunStatus],
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(RunStatus::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE runs SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id.to_uuid())
        .bind(status.as_str())
        .bind(from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_records(&self, records: &[RunRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for chunk in records.chunks(1_000) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO run_records (id, run_id, lead, status, updated_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id.to_uuid())
                    .push_bind(record.run_id.to_uuid())
                    .push_bind(Json(&record.lead))
                    .push_bind(record.status.as_str())
                    .push_bind(record.updated_at);
            });
            builder.push(" ON CONFLICT (id) DO NOTHING");
            builder.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn get_record(&self, id: RunRecordId) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM run_records WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::decode_record)
            .transpose()
    }

    async fn page_records(&self, query: &RecordQuery) -> Result<Vec<RunRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM run_records WHERE run_id = "
        ));
        builder.push_bind(query.run_id.to_uuid());
        Self::push_filter(&mut builder, query.filter);
        if let Some(after) = query.after {
            builder.push(" AND id > ");
            builder.push_bind(after.to_uuid());
        }
        builder.push(" ORDER BY id ASC LIMIT ");
        builder.push_bind(query.limit as i64);
        if query.offset > 0 {
            builder.push(" OFFSET ");
            builder.push_bind(query.offset as i64);
        }

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::decode_record)
            .collect()
    }

    async fn record_statuses(&self, run_id: RunId) -> Result<Vec<RunRecordStatus>> {
        let rows = sqlx::query("SELECT status FROM run_records WHERE run_id = $1")
            .bind(run_id.to_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<RunRecordStatus> {
                let status: String = row.try_get("status")?;
                Ok(RunRecordStatus::from_str(&status)?)
            })
            .collect()
    }

    async fn update_record(
        &self,
        id: RunRecordId,
        patch: &RecordPatch,
    ) -> Result<bool> {
        let mut builder =
            QueryBuilder::<Postgres>::new("UPDATE run_records SET updated_at = NOW()");

        if let Some(status) = patch.status {
            builder.push(", status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(value) = patch.regex_valid {
            builder.push(", regex_valid = ");
            builder.push_bind(value);
        }
        if let Some(value) = &patch.email_validation_result {
            builder.push(", email_validation_result = ");
            builder.push_bind(value.clone().map(Json));
        }
        if let Some(value) = &patch.email_finding_result {
            builder.push(", email_finding_result = ");
            builder.push_bind(value.clone().map(Json));
        }
        if let Some(value) = &patch.company_validation_result {
            builder.push(", company_validation_result = ");
            builder.push_bind(value.clone().map(Json));
        }
        if let Some(value) = &patch.failure_reason {
            builder.push(", failure_reason = ");
            builder.push_bind(value.clone());
        }
        if let Some(value) = patch.correlation_id {
            builder.push(", correlation_id = ");
            builder.push_bind(value);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id.to_uuid());
        if patch.guard == Guard::NotTerminal {
            builder.push(" AND status NOT IN ");
            builder.push(TERMINAL_STATUSES);
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
