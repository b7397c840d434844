use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::RunId;

/// Lifecycle of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// Behaviour switches that apply to every record of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunFlags {
    /// Skip email resolution entirely and go straight to the company check.
    pub skip_email_validation: bool,
    /// Bypass cache reads for every validator call of this run. Results are
    /// still written back so later runs see the refreshed values.
    pub ignore_cache: bool,
}

/// A batch validation job over a set of records.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Run {
    pub id: RunId,
    pub status: RunStatus,
    pub flags: RunFlags,
    /// Free-text company requirements every record is checked against.
    pub requirement: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(requirement: Option<String>, flags: RunFlags) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            status: RunStatus::Queued,
            flags,
            requirement,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            RunStatus::Queued,
            RunStatus::Processing,
            RunStatus::Completed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn new_run_starts_queued() {
        let run = Run::new(Some("B2B SaaS".into()), RunFlags::default());
        assert_eq!(run.status, RunStatus::Queued);
        assert!(!run.flags.skip_email_validation);
    }
}
