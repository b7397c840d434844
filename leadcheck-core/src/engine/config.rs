use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::events::RouterConfig;

use super::workflow::WorkflowKind;

const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// Engine-wide knobs. Every field has a default so partial configuration
/// files stay valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Redelivery policy of the event router.
    pub router: RouterConfig,
    /// Page size used by fan-out, cancellation and retrigger sweeps.
    pub page_size: usize,
    /// Default retry policy for steps.
    pub retry: RetryPolicy,
    /// Limits for `process-run-record`.
    #[serde(deserialize_with = "record_limits")]
    pub record: WorkflowLimits,
    /// Limits for the run-level workflows (fan-out, cancel, retrigger,
    /// field update).
    #[serde(deserialize_with = "run_limits")]
    pub run: WorkflowLimits,
    /// Limits for the email and company validator workflows.
    pub validators: WorkflowLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            page_size: 1_000,
            retry: RetryPolicy::default(),
            record: WorkflowLimits::RECORD,
            run: WorkflowLimits::RUN,
            validators: WorkflowLimits::default(),
        }
    }
}

impl EngineConfig {
    pub fn limits(&self, kind: WorkflowKind) -> &WorkflowLimits {
        match kind {
            WorkflowKind::ProcessRunRecord => &self.record,
            WorkflowKind::ProcessRun
            | WorkflowKind::CancelRun
            | WorkflowKind::RetriggerStuckRecords
            | WorkflowKind::UpdateRunRecord => &self.run,
            WorkflowKind::ValidateEmail
            | WorkflowKind::EmailValidationApi
            | WorkflowKind::EmailFindingApi
            | WorkflowKind::ValidateCompany
            | WorkflowKind::CompanyValidationApi => &self.validators,
        }
    }
}

/// Concurrency ceiling and timeouts for one workflow kind. `None` means
/// unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowLimits {
    pub concurrency: Option<usize>,
    /// Longest an execution may wait for a concurrency slot.
    pub start_timeout_ms: Option<u64>,
    /// Longest an execution may run once started.
    pub finish_timeout_ms: Option<u64>,
}

impl WorkflowLimits {
    /// Defaults for `process-run-record`.
    pub const RECORD: Self = Self {
        concurrency: Some(10),
        start_timeout_ms: Some(DAY_MS),
        finish_timeout_ms: Some(DAY_MS),
    };

    /// Defaults for the run-level workflows.
    pub const RUN: Self = Self {
        concurrency: Some(10),
        start_timeout_ms: None,
        finish_timeout_ms: None,
    };

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_ms.map(Duration::from_millis)
    }

    pub fn finish_timeout(&self) -> Option<Duration> {
        self.finish_timeout_ms.map(Duration::from_millis)
    }
}

/// Limits table as written in a config file. Absent keys keep the
/// default; an explicit `null` clears it.
#[derive(Debug, Default, Deserialize)]
struct LimitsOverlay {
    #[serde(default, deserialize_with = "present")]
    concurrency: Option<Option<usize>>,
    #[serde(default, deserialize_with = "present")]
    start_timeout_ms: Option<Option<u64>>,
    #[serde(default, deserialize_with = "present")]
    finish_timeout_ms: Option<Option<u64>>,
}

impl LimitsOverlay {
    fn over(self, base: WorkflowLimits) -> WorkflowLimits {
        WorkflowLimits {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            start_timeout_ms: self.start_timeout_ms.unwrap_or(base.start_timeout_ms),
            finish_timeout_ms: self.finish_timeout_ms.unwrap_or(base.finish_timeout_ms),
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn record_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WorkflowLimits, D::Error> {
    LimitsOverlay::deserialize(deserializer).map(|overlay| overlay.over(WorkflowLimits::RECORD))
}

fn run_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WorkflowLimits, D::Error> {
    LimitsOverlay::deserialize(deserializer).map(|overlay| overlay.over(WorkflowLimits::RUN))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry policy for transient step failures.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a step runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added as random jitter.
    pub jitter_ratio: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_retries,
            backoff: BackoffKind::Fixed,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter_ratio: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = match self.backoff {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let factor = 1u64 << retry.saturating_sub(1).min(20);
                self.base_delay_ms.saturating_mul(factor)
            }
        }
        .min(self.max_delay_ms.max(self.base_delay_ms));

        let jitter_span = (base as f64 * self.jitter_ratio.clamp(0.0, 1.0) as f64) as u64;
        let jitter = if jitter_span > 0 {
            rand::rng().random_range(0..=jitter_span)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn fixed_delay_never_grows() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Fixed,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_ratio: 0.5,
            max_retries: 1,
        };
        for _ in 0..32 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_500));
        }
    }

    #[test]
    fn record_defaults_match_deployment() {
        let config = EngineConfig::default();
        let record = config.limits(WorkflowKind::ProcessRunRecord);
        assert_eq!(record.concurrency, Some(10));
        assert_eq!(record.finish_timeout(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.limits(WorkflowKind::ValidateEmail).concurrency, None);
        assert_eq!(config.page_size, 1_000);
    }

    #[test]
    fn partial_limits_keep_unspecified_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "record": { "concurrency": 3 },
            "run": { "finish_timeout_ms": 5_000 },
        }))
        .expect("decode");

        assert_eq!(config.record.concurrency, Some(3));
        assert_eq!(config.record.start_timeout_ms, Some(DAY_MS));
        assert_eq!(config.record.finish_timeout_ms, Some(DAY_MS));
        assert_eq!(config.run.concurrency, Some(10));
        assert_eq!(config.run.finish_timeout_ms, Some(5_000));
        assert_eq!(config.validators, WorkflowLimits::default());
    }

    #[test]
    fn null_clears_a_limit() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "record": { "finish_timeout_ms": null },
        }))
        .expect("decode");

        assert_eq!(config.record.finish_timeout_ms, None);
        assert_eq!(config.record.start_timeout_ms, Some(DAY_MS));
    }
}
