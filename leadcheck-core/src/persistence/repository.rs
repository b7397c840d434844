use async_trait::async_trait;
use leadcheck_model::{
    CompanyVerdict, EmailVerdict, RecordField, Run, RunId, RunRecord,
    RunRecordId, RunRecordStatus, RunStatus,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LeadError, Result};

/// Status predicate for record range queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    Eq(RunRecordStatus),
    NotEq(RunRecordStatus),
    NonTerminal,
}

impl StatusFilter {
    pub fn matches(&self, status: RunRecordStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Eq(expected) => status == *expected,
            StatusFilter::NotEq(excluded) => status != *excluded,
            StatusFilter::NonTerminal => !status.is_terminal(),
        }
    }
}

/// One page of a run's records ordered by id.
///
/// `after` is a keyset cursor for sweeps that change the filtered column as
/// they go; `offset` is plain offset paging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordQuery {
    pub run_id: RunId,
    pub filter: StatusFilter,
    pub after: Option<RunRecordId>,
    pub offset: usize,
    pub limit: usize,
}

impl RecordQuery {
    pub fn offset(run_id: RunId, filter: StatusFilter, offset: usize, limit: usize) -> Self {
        Self {
            run_id,
            filter,
            after: None,
            offset,
            limit,
        }
    }

    pub fn keyset(
        run_id: RunId,
        filter: StatusFilter,
        after: Option<RunRecordId>,
        limit: usize,
    ) -> Self {
        Self {
            run_id,
            filter,
            after,
            offset: 0,
            limit,
        }
    }
}

/// Precondition of a record update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Guard {
    #[default]
    Any,
    /// Only applies while the record is not completed, failed or cancelled.
    NotTerminal,
}

/// Whole-value field assignments for one record. `None` leaves a field
/// untouched; `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<RunRecordStatus>,
    pub regex_valid: Option<Option<bool>>,
    pub email_validation_result: Option<Option<EmailVerdict>>,
    pub email_finding_result: Option<Option<EmailVerdict>>,
    pub company_validation_result: Option<Option<CompanyVerdict>>,
    pub failure_reason: Option<Option<String>>,
    pub correlation_id: Option<Option<Uuid>>,
    pub guard: Guard,
}

impl RecordPatch {
    pub fn status(status: RunRecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(Some(reason.into()));
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<Uuid>) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Reset used by retrigger: back to pending with every validation
    /// payload cleared.
    pub fn reset_to_pending() -> Self {
        Self {
            status: Some(RunRecordStatus::Pending),
            regex_valid: Some(None),
            email_validation_result: Some(None),
            email_finding_result: Some(None),
            company_validation_result: Some(None),
            failure_reason: Some(None),
            correlation_id: Some(None),
            guard: Guard::Any,
        }
    }

    /// Assignment of a single named field from an untyped value; `null`
    /// clears the field.
    pub fn field(field: RecordField, data: Value) -> Result<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            field: RecordField,
            data: Value,
        ) -> Result<Option<T>> {
            if data.is_null() {
                return Ok(None);
            }
            serde_json::from_value(data).map(Some).map_err(|err| {
                LeadError::InvalidInput(format!("invalid value for {field}: {err}"))
            })
        }

        let mut patch = Self::default();
        match field {
            RecordField::RegexValid => {
                patch.regex_valid = Some(decode(field, data)?)
            }
            RecordField::EmailValidationResult => {
                patch.email_validation_result = Some(decode(field, data)?)
            }
            RecordField::EmailFindingResult => {
                patch.email_finding_result = Some(decode(field, data)?)
            }
            RecordField::CompanyValidationResult => {
                patch.company_validation_result = Some(decode(field, data)?)
            }
            RecordField::FailureReason => {
                patch.failure_reason = Some(decode(field, data)?)
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.regex_valid.is_none()
            && self.email_validation_result.is_none()
            && self.email_finding_result.is_none()
            && self.company_validation_result.is_none()
            && self.failure_reason.is_none()
            && self.correlation_id.is_none()
    }

    /// Applies the patch to an in-memory record, honouring the guard.
    pub fn apply(&self, record: &mut RunRecord) -> bool {
        if self.guard == Guard::NotTerminal && record.status.is_terminal() {
            return false;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(value) = self.regex_valid {
            record.regex_valid = value;
        }
        if let Some(value) = &self.email_validation_result {
            record.email_validation_result = value.clone();
        }
        if let Some(value) = &self.email_finding_result {
            record.email_finding_result = value.clone();
        }
        if let Some(value) = &self.company_validation_result {
            record.company_validation_result = value.clone();
        }
        if let Some(value) = &self.failure_reason {
            record.failure_reason = value.clone();
        }
        if let Some(value) = self.correlation_id {
            record.correlation_id = value;
        }
        record.updated_at = chrono::Utc::now();
        true
    }
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert_run(&self, run: &Run) -> Result<()>;

    async fn get_run(&self, id: RunId) -> Result<Option<Run>>;

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<()>;

    /// Sets the status only while the current one is in `from`; returns
    /// whether the row changed.
    async fn set_run_status_if(
        &self,
        id: RunId,
        status: RunStatus,
        from: &[RunStatus],
    ) -> Result<bool>;

    async fn insert_records(&self, records: &[RunRecord]) -> Result<()>;

    async fn get_record(&self, id: RunRecordId) -> Result<Option<RunRecord>>;

    async fn page_records(&self, query: &RecordQuery) -> Result<Vec<RunRecord>>;

    async fn record_statuses(&self, run_id: RunId) -> Result<Vec<RunRecordStatus>>;

    /// Applies `patch` to one record; returns whether the guard allowed it.
    async fn update_record(
        &self,
        id: RunRecordId,
        patch: &RecordPatch,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadcheck_model::Lead;
    use serde_json::json;

    #[test]
    fn guard_protects_terminal_records() {
        let mut record = RunRecord::new(RunId::new(), Lead::default());
        record.status = RunRecordStatus::Cancelled;

        let patch = RecordPatch::status(RunRecordStatus::Completed)
            .guarded(Guard::NotTerminal);
        assert!(!patch.apply(&mut record));
        assert_eq!(record.status, RunRecordStatus::Cancelled);

        assert!(RecordPatch::status(RunRecordStatus::Pending).apply(&mut record));
        assert_eq!(record.status, RunRecordStatus::Pending);
    }

    #[test]
    fn field_patch_decodes_by_field_type() {
        let patch = RecordPatch::field(RecordField::RegexValid, json!(true))
            .expect("bool");
        assert_eq!(patch.regex_valid, Some(Some(true)));

        let patch = RecordPatch::field(RecordField::FailureReason, Value::Null)
            .expect("null clears");
        assert_eq!(patch.failure_reason, Some(None));

        let err = RecordPatch::field(RecordField::RegexValid, json!("yes"))
            .expect_err("wrong type");
        assert!(matches!(err, LeadError::InvalidInput(_)));
    }

    #[test]
    fn reset_clears_payloads() {
        let mut record = RunRecord::new(RunId::new(), Lead::default());
        record.status = RunRecordStatus::Failed;
        record.regex_valid = Some(false);
        record.failure_reason = Some("Email validation failed".into());

        assert!(RecordPatch::reset_to_pending().apply(&mut record));
        assert_eq!(record.status, RunRecordStatus::Pending);
        assert_eq!(record.regex_valid, None);
        assert_eq!(record.failure_reason, None);
    }

    #[test]
    fn filters() {
        assert!(StatusFilter::NonTerminal.matches(RunRecordStatus::Processing));
        assert!(!StatusFilter::NonTerminal.matches(RunRecordStatus::Failed));
        assert!(StatusFilter::NotEq(RunRecordStatus::Completed)
            .matches(RunRecordStatus::Cancelled));
    }
}
