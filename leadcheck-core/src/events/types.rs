use std::fmt;

use chrono::{DateTime, Utc};
use leadcheck_model::{RunId, RunRecord, RunRecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LeadError, Result};

/// Unique id of a published event; also seeds the execution ids of the
/// workflows it triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Stable id for an event re-published by a resumed step.
    pub fn derived(scope: &str, subject: &Uuid) -> Self {
        let mut name = Vec::with_capacity(scope.len() + 16);
        name.extend_from_slice(scope.as_bytes());
        name.extend_from_slice(subject.as_bytes());
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, &name))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "run.queued")]
    RunQueued,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
    #[serde(rename = "run.retrigger-stuck")]
    RunRetriggerStuck,
    #[serde(rename = "run.record.queued")]
    RecordQueued,
    #[serde(rename = "run.record.cancelled")]
    RecordCancelled,
    #[serde(rename = "run.record.update")]
    RecordUpdate,
    #[serde(rename = "email.validate")]
    EmailValidate,
    #[serde(rename = "email.validate-api")]
    EmailValidateApi,
    #[serde(rename = "email.find-api")]
    EmailFindApi,
    #[serde(rename = "company.validate")]
    CompanyValidate,
    #[serde(rename = "company.validate-api")]
    CompanyValidateApi,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::RunQueued => "run.queued",
            EventName::RunCancelled => "run.cancelled",
            EventName::RunRetriggerStuck => "run.retrigger-stuck",
            EventName::RecordQueued => "run.record.queued",
            EventName::RecordCancelled => "run.record.cancelled",
            EventName::RecordUpdate => "run.record.update",
            EventName::EmailValidate => "email.validate",
            EventName::EmailValidateApi => "email.validate-api",
            EventName::EmailFindApi => "email.find-api",
            EventName::CompanyValidate => "company.validate",
            EventName::CompanyValidateApi => "company.validate-api",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity an in-flight execution is matched against when a cancellation
/// event arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CorrelationKey {
    Run(RunId),
    RunRecord(RunRecordId),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Run(id) => write!(f, "run:{id}"),
            CorrelationKey::RunRecord(id) => write!(f, "run_record:{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQueued {
    pub run_id: RunId,
    #[serde(default)]
    pub ignore_cache: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub run_id: RunId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQueued {
    pub run_record_id: RunRecordId,
    #[serde(default)]
    pub ignore_cache: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub run_record_id: RunRecordId,
}

/// Raw field update; the field name is validated by the handling workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub run_record_id: Option<RunRecordId>,
    pub field_name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub run_record: RunRecord,
    #[serde(default)]
    pub ignore_cache: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyRequest {
    pub run_record: Option<RunRecord>,
    pub website: Option<String>,
    pub requirements: Option<String>,
    pub ignore_cache: bool,
}

impl CompanyRequest {
    pub fn for_record(
        record: &RunRecord,
        requirements: Option<String>,
        ignore_cache: bool,
    ) -> Self {
        Self {
            run_record: Some(record.clone()),
            website: None,
            requirements,
            ignore_cache,
        }
    }

    /// Explicit website, falling back to the record's lead.
    pub fn website(&self) -> Option<&str> {
        self.website
            .as_deref()
            .or_else(|| {
                self.run_record
                    .as_ref()
                    .and_then(|record| record.lead.website.as_deref())
            })
            .map(str::trim)
            .filter(|website| !website.is_empty())
    }

    pub fn requirements(&self) -> Option<&str> {
        self.requirements
            .as_deref()
            .map(str::trim)
            .filter(|requirements| !requirements.is_empty())
    }
}

/// Every event the system publishes or consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "run.queued")]
    RunQueued(RunQueued),
    #[serde(rename = "run.cancelled")]
    RunCancelled(RunRef),
    #[serde(rename = "run.retrigger-stuck")]
    RunRetriggerStuck(RunRef),
    #[serde(rename = "run.record.queued")]
    RecordQueued(RecordQueued),
    #[serde(rename = "run.record.cancelled")]
    RecordCancelled(RecordRef),
    #[serde(rename = "run.record.update")]
    RecordUpdate(RecordUpdate),
    #[serde(rename = "email.validate")]
    EmailValidate(EmailRequest),
    #[serde(rename = "email.validate-api")]
    EmailValidateApi(EmailRequest),
    #[serde(rename = "email.find-api")]
    EmailFindApi(EmailRequest),
    #[serde(rename = "company.validate")]
    CompanyValidate(CompanyRequest),
    #[serde(rename = "company.validate-api")]
    CompanyValidateApi(CompanyRequest),
}

impl DomainEvent {
    pub fn name(&self) -> EventName {
        match self {
            DomainEvent::RunQueued(_) => EventName::RunQueued,
            DomainEvent::RunCancelled(_) => EventName::RunCancelled,
            DomainEvent::RunRetriggerStuck(_) => EventName::RunRetriggerStuck,
            DomainEvent::RecordQueued(_) => EventName::RecordQueued,
            DomainEvent::RecordCancelled(_) => EventName::RecordCancelled,
            DomainEvent::RecordUpdate(_) => EventName::RecordUpdate,
            DomainEvent::EmailValidate(_) => EventName::EmailValidate,
            DomainEvent::EmailValidateApi(_) => EventName::EmailValidateApi,
            DomainEvent::EmailFindApi(_) => EventName::EmailFindApi,
            DomainEvent::CompanyValidate(_) => EventName::CompanyValidate,
            DomainEvent::CompanyValidateApi(_) => EventName::CompanyValidateApi,
        }
    }

    /// Key used to match this event against registered cancellation
    /// predicates.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        match self {
            DomainEvent::RunQueued(data) => Some(CorrelationKey::Run(data.run_id)),
            DomainEvent::RunCancelled(data)
            | DomainEvent::RunRetriggerStuck(data) => {
                Some(CorrelationKey::Run(data.run_id))
            }
            DomainEvent::RecordQueued(data) => {
                Some(CorrelationKey::RunRecord(data.run_record_id))
            }
            DomainEvent::RecordCancelled(data) => {
                Some(CorrelationKey::RunRecord(data.run_record_id))
            }
            DomainEvent::RecordUpdate(data) => {
                data.run_record_id.map(CorrelationKey::RunRecord)
            }
            DomainEvent::EmailValidate(data)
            | DomainEvent::EmailValidateApi(data)
            | DomainEvent::EmailFindApi(data) => {
                Some(CorrelationKey::RunRecord(data.run_record.id))
            }
            DomainEvent::CompanyValidate(data)
            | DomainEvent::CompanyValidateApi(data) => data
                .run_record
                .as_ref()
                .map(|record| CorrelationKey::RunRecord(record.id)),
        }
    }
}

/// An event on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub event: DomainEvent,
    pub published_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self::with_id(EventId::new(), event)
    }

    pub fn with_id(id: EventId, event: DomainEvent) -> Self {
        Self {
            id,
            event,
            published_at: Utc::now(),
        }
    }

    pub fn name(&self) -> EventName {
        self.event.name()
    }

    /// Decodes an untyped `{name, data}` pair, rejecting names and payloads
    /// outside the closed event set.
    pub fn decode(id: Option<EventId>, name: &str, data: Value) -> Result<Self> {
        let tagged = serde_json::json!({ "name": name, "data": data });
        let event = serde_json::from_value::<DomainEvent>(tagged).map_err(
            |err| LeadError::UnknownEvent(format!("{name}: {err}")),
        )?;
        Ok(Self::with_id(id.unwrap_or_default(), event))
    }
}
