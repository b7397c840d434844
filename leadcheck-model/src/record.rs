use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ModelError;
use crate::ids::{RunId, RunRecordId};
use crate::verdict::{CompanyVerdict, EmailVerdict};

/// Per-record validation state.
///
/// Transitions are monotonic toward a terminal status; only the retrigger
/// operation moves a record back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunRecordStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RunRecordStatus {
    pub const TERMINAL: [RunRecordStatus; 3] = [
        RunRecordStatus::Completed,
        RunRecordStatus::Failed,
        RunRecordStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunRecordStatus::Pending => "pending",
            RunRecordStatus::Processing => "processing",
            RunRecordStatus::Completed => "completed",
            RunRecordStatus::Failed => "failed",
            RunRecordStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled all count toward run completion.
    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for RunRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunRecordStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunRecordStatus::Pending),
            "processing" => Ok(RunRecordStatus::Processing),
            "completed" => Ok(RunRecordStatus::Completed),
            "failed" => Ok(RunRecordStatus::Failed),
            "cancelled" => Ok(RunRecordStatus::Cancelled),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// The lead data a record carries into validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Lead {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub website: Option<String>,
}

/// One lead's validation state within a run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunRecord {
    pub id: RunRecordId,
    pub run_id: RunId,
    pub lead: Lead,
    pub status: RunRecordStatus,
    pub regex_valid: Option<bool>,
    pub email_validation_result: Option<EmailVerdict>,
    pub email_finding_result: Option<EmailVerdict>,
    pub company_validation_result: Option<CompanyVerdict>,
    pub failure_reason: Option<String>,
    /// Id of the queued event whose execution currently owns this record.
    pub correlation_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run_id: RunId, lead: Lead) -> Self {
        Self {
            id: RunRecordId::new(),
            run_id,
            lead,
            status: RunRecordStatus::Pending,
            regex_valid: None,
            email_validation_result: None,
            email_finding_result: None,
            company_validation_result: None,
            failure_reason: None,
            correlation_id: None,
            updated_at: Utc::now(),
        }
    }
}

/// Record columns that may be written individually by the field-update
/// workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecordField {
    RegexValid,
    EmailValidationResult,
    EmailFindingResult,
    CompanyValidationResult,
    FailureReason,
}

impl RecordField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::RegexValid => "regex_valid",
            RecordField::EmailValidationResult => "email_validation_result",
            RecordField::EmailFindingResult => "email_finding_result",
            RecordField::CompanyValidationResult => {
                "company_validation_result"
            }
            RecordField::FailureReason => "failure_reason",
        }
    }
}

impl FromStr for RecordField {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regex_valid" => Ok(RecordField::RegexValid),
            "email_validation_result" => Ok(RecordField::EmailValidationResult),
            "email_finding_result" => Ok(RecordField::EmailFindingResult),
            "company_validation_result" => {
                Ok(RecordField::CompanyValidationResult)
            }
            "failure_reason" => Ok(RecordField::FailureReason),
            other => Err(ModelError::UnknownField(other.to_string())),
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
