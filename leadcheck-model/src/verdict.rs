//! Normalized validator results persisted on run records and in the caches.

use std::fmt;

/// Deliverability classification reported by the email provider.
///
/// Unrecognised provider strings collapse into [`EmailStatus::Unknown`] so a
/// new provider status never fails deserialization of cached payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "String", into = "String"))]
pub enum EmailStatus {
    Valid,
    ValidCatchAll,
    CatchAll,
    Invalid,
    Unknown,
    /// Placeholder written when the run skips email validation.
    Skipped,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Valid => "valid",
            EmailStatus::ValidCatchAll => "valid_catch_all",
            EmailStatus::CatchAll => "catch_all",
            EmailStatus::Invalid => "invalid",
            EmailStatus::Unknown => "unknown",
            EmailStatus::Skipped => "skipped",
        }
    }

    /// Statuses that count as a resolved, deliverable address.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, EmailStatus::Valid | EmailStatus::ValidCatchAll)
    }
}

impl From<&str> for EmailStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "valid" => EmailStatus::Valid,
            "valid_catch_all" => EmailStatus::ValidCatchAll,
            "catch_all" => EmailStatus::CatchAll,
            "invalid" => EmailStatus::Invalid,
            "skipped" => EmailStatus::Skipped,
            _ => EmailStatus::Unknown,
        }
    }
}

impl From<String> for EmailStatus {
    fn from(raw: String) -> Self {
        EmailStatus::from(raw.as_str())
    }
}

impl From<EmailStatus> for String {
    fn from(status: EmailStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mail routing metadata returned alongside a verification or finding.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EmailRouting {
    pub domain: Option<String>,
    pub mx_provider: Option<String>,
    pub mx_record: Option<String>,
    pub mx_security_gateway: Option<bool>,
    pub is_domain_catch_all: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmailVerdict {
    pub status: EmailStatus,
    #[cfg_attr(feature = "serde", serde(default))]
    pub email: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reason: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub routing: EmailRouting,
    #[cfg_attr(feature = "serde", serde(default))]
    pub credits_consumed: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cached: bool,
}

impl EmailVerdict {
    /// A negative verdict produced locally, without a provider call.
    pub fn rejected(status: EmailStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            email: None,
            reason: Some(reason.into()),
            routing: EmailRouting::default(),
            credits_consumed: None,
            cached: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: EmailStatus::Skipped,
            email: None,
            reason: None,
            routing: EmailRouting::default(),
            credits_consumed: None,
            cached: false,
        }
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

/// Token accounting reported by the reasoning provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompanyVerdict {
    pub valid: bool,
    pub reasoning: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub usage: TokenUsage,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cached: bool,
}

impl CompanyVerdict {
    /// Negative result for inputs or responses that can never succeed.
    pub fn rejected(reasoning: impl Into<String>) -> Self {
        Self {
            valid: false,
            reasoning: reasoning.into(),
            usage: TokenUsage::default(),
            cached: false,
        }
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_status_maps_to_unknown() {
        assert_eq!(EmailStatus::from("VALID"), EmailStatus::Valid);
        assert_eq!(EmailStatus::from("spamtrap"), EmailStatus::Unknown);
    }

    #[test]
    fn only_valid_statuses_are_deliverable() {
        assert!(EmailStatus::Valid.is_deliverable());
        assert!(EmailStatus::ValidCatchAll.is_deliverable());
        assert!(!EmailStatus::CatchAll.is_deliverable());
        assert!(!EmailStatus::Skipped.is_deliverable());
    }
}
