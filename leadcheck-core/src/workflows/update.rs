use async_trait::async_trait;
use leadcheck_model::{RecordField, RunRecordId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{StepContext, Workflow, WorkflowKind};
use crate::error::{LeadError, Result};
use crate::events::{DomainEvent, EventName, RecordUpdate};
use crate::persistence::RecordPatch;

use super::WorkflowDeps;

/// Field written by an `update-run-record` execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub run_record_id: RunRecordId,
    pub field: RecordField,
}

/// Validates a raw update event into a record id, field and patch.
fn parse_update(input: &RecordUpdate) -> Result<(RunRecordId, RecordField, RecordPatch)> {
    let (Some(id), Some(field_name)) = (input.run_record_id, input.field_name.as_deref())
    else {
        return Err(LeadError::InvalidInput(
            "Missing required parameters for updating run record".to_string(),
        ));
    };
    let field: RecordField = field_name.parse().map_err(|_| {
        LeadError::InvalidInput(format!("Unknown run record field {field_name}"))
    })?;
    let patch = RecordPatch::field(field, input.data.clone())?;
    Ok((id, field, patch))
}

/// `update-run-record`: whole-value set of one named record field.
#[derive(Debug)]
pub struct UpdateRecordWorkflow {
    deps: WorkflowDeps,
}

impl UpdateRecordWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for UpdateRecordWorkflow {
    type Input = RecordUpdate;
    type Output = FieldUpdate;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::UpdateRunRecord
    }

    fn trigger(&self) -> EventName {
        EventName::RecordUpdate
    }

    fn accept(&self, event: &DomainEvent) -> Option<RecordUpdate> {
        match event {
            DomainEvent::RecordUpdate(data) => Some(data.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: RecordUpdate) -> Result<FieldUpdate> {
        let (id, field, patch) = parse_update(&input)?;
        let repo = self.deps.repo.as_ref();
        let patch = &patch;

        ctx.run("update-run-record", move || async move {
            if repo.get_record(id).await?.is_none() {
                return Err(LeadError::NotFound(format!("run record {id}")));
            }
            repo.update_record(id, patch).await
        })
        .await?;

        info!(run_record_id = %id, field = %field, "run record field updated");
        Ok(FieldUpdate {
            run_record_id: id,
            field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(field: Option<&str>, data: serde_json::Value) -> RecordUpdate {
        RecordUpdate {
            run_record_id: Some(RunRecordId::new()),
            field_name: field.map(str::to_string),
            data,
        }
    }

    #[test]
    fn accepts_known_fields() {
        let (_, field, patch) =
            parse_update(&update(Some("regex_valid"), json!(true))).expect("parse");
        assert_eq!(field, RecordField::RegexValid);
        assert_eq!(patch.regex_valid, Some(Some(true)));
    }

    #[test]
    fn rejects_unknown_or_missing_fields() {
        let err = parse_update(&update(Some("status"), json!("completed")))
            .expect_err("status is not updatable");
        assert!(matches!(err, LeadError::InvalidInput(_)));
        assert!(!err.is_transient());

        let err = parse_update(&update(None, json!(null))).expect_err("missing field");
        assert!(matches!(err, LeadError::InvalidInput(_)));

        let mut missing_id = update(Some("failure_reason"), json!("x"));
        missing_id.run_record_id = None;
        assert!(parse_update(&missing_id).is_err());
    }
}
