use std::sync::Arc;

use async_trait::async_trait;
use leadcheck_model::{
    CompanyVerdict, EmailVerdict, Run, RunRecord, RunRecordStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{StepContext, Workflow, WorkflowKind};
use crate::error::{LeadError, Result};
use crate::events::{
    CompanyRequest, CorrelationKey, DomainEvent, EmailRequest, EventName,
    RecordQueued,
};
use crate::persistence::{Guard, RecordPatch};

use super::{
    WorkflowDeps,
    company::ValidateCompany,
    completion::check_run_completion,
    email::ValidateEmail,
};

/// Result of one record validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub status: RunRecordStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub company_validation: Option<CompanyVerdict>,
}

/// `process-run-record`: regex check, email resolution, company check,
/// finalize, then the run completion re-check.
#[derive(Debug)]
pub struct RecordValidationWorkflow {
    deps: WorkflowDeps,
    email: Arc<ValidateEmail>,
    company: Arc<ValidateCompany>,
}

impl RecordValidationWorkflow {
    pub fn new(
        deps: WorkflowDeps,
        email: Arc<ValidateEmail>,
        company: Arc<ValidateCompany>,
    ) -> Self {
        Self {
            deps,
            email,
            company,
        }
    }

    async fn finish(
        &self,
        ctx: &StepContext,
        record: &RunRecord,
        patch: RecordPatch,
        step: &str,
    ) -> Result<bool> {
        let repo = self.deps.repo.as_ref();
        let id = record.id;
        let run_id = record.run_id;
        let patch = &patch.guarded(Guard::NotTerminal);

        let applied = ctx
            .run(step, move || async move { repo.update_record(id, patch).await })
            .await?;
        if !applied {
            warn!(run_record_id = %id, "record already terminal; outcome not written");
        }

        ctx.run("check-run-completion", move || async move {
            check_run_completion(repo, run_id).await
        })
        .await?;
        Ok(applied)
    }
}

fn email_failure_reason(verdict: &EmailVerdict) -> String {
    format!(
        "Email validation failed: {}",
        verdict.reason.as_deref().unwrap_or("Unknown reason")
    )
}

#[async_trait]
impl Workflow for RecordValidationWorkflow {
    type Input = RecordQueued;
    type Output = RecordOutcome;

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

    async fn run(&self, ctx: &StepContext, input: RecordQueued) -> Result<RecordOutcome> {
        let repo = self.deps.repo.as_ref();
        let record_id = input.run_record_id;

        let record: RunRecord = ctx
            .run("fetch-run-record", move || async move {
                repo.get_record(record_id).await?.ok_or_else(|| {
                    LeadError::InvalidInput(format!("run record {record_id} does not exist"))
                })
            })
            .await?;

        if record.status.is_terminal() {
            info!(run_record_id = %record_id, status = %record.status, "record already terminal; skipping");
            return Ok(RecordOutcome {
                status: record.status,
                reason: record.failure_reason.clone(),
                company_validation: record.company_validation_result.clone(),
            });
        }

        let run_id = record.run_id;
        let run: Run = ctx
            .run("fetch-run", move || async move {
                repo.get_run(run_id).await?.ok_or_else(|| {
                    LeadError::InvalidInput(format!("run {run_id} does not exist"))
                })
            })
            .await?;

        let ignore_cache = run.flags.ignore_cache || input.ignore_cache;
        let skip_email = run.flags.skip_email_validation;

        if !skip_email {
            let resolved = ctx
                .invoke(
                    "validate-email",
                    self.email.as_ref(),
                    EmailRequest {
                        run_record: record.clone(),
                        ignore_cache,
                    },
                )
                .await?;

            if !resolved.status.is_deliverable() {
                let reason = email_failure_reason(&resolved);
                info!(run_record_id = %record_id, reason = %reason, "record failed email resolution");
                self.finish(
                    ctx,
                    &record,
                    RecordPatch::status(RunRecordStatus::Failed)
                        .with_failure_reason(reason.clone()),
                    "update-run-record-status",
                )
                .await?;
                return Ok(RecordOutcome {
                    status: RunRecordStatus::Failed,
                    reason: Some(reason),
                    company_validation: None,
                });
            }
        }

        let company = ctx
            .invoke(
                "validate-company",
                self.company.as_ref(),
                CompanyRequest::for_record(&record, run.requirement.clone(), ignore_cache),
            )
            .await?;

        let mut patch = RecordPatch::status(RunRecordStatus::Completed);
        patch.company_validation_result = Some(Some(company.clone()));
        if skip_email {
            patch.email_validation_result = Some(Some(EmailVerdict::skipped()));
        }
        self.finish(ctx, &record, patch, "update-run-record-company-validation")
            .await?;

        info!(run_record_id = %record_id, company_valid = company.valid, cached = company.cached, "record completed");
        Ok(RecordOutcome {
            status: RunRecordStatus::Completed,
            reason: None,
            company_validation: Some(company),
        })
    }

    async fn on_failure(&self, input: &RecordQueued, error: &LeadError) -> Result<()> {
        let repo = self.deps.repo.as_ref();
        let Some(record) = repo.get_record(input.run_record_id).await? else {
            return Ok(());
        };

        let patch = RecordPatch::status(RunRecordStatus::Failed)
            .with_failure_reason(error.to_string())
            .guarded(Guard::NotTerminal);
        repo.update_record(record.id, &patch).await?;
        check_run_completion(repo, record.run_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadcheck_model::EmailStatus;

    #[test]
    fn failure_reason_cites_the_resolution() {
        let verdict = EmailVerdict::rejected(
            EmailStatus::Invalid,
            "No website provided for email finding",
        );
        assert_eq!(
            email_failure_reason(&verdict),
            "Email validation failed: No website provided for email finding"
        );

        let mut bare = verdict.clone();
        bare.reason = None;
        assert_eq!(
            email_failure_reason(&bare),
            "Email validation failed: Unknown reason"
        );
    }
}
