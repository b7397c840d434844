#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use leadcheck_core::{
    LeadError, RuntimeServices, ValidatorRuntime,
    cache::InMemoryCacheStore,
    engine::{EngineConfig, InMemoryStepLog, RetryPolicy},
    error::Result,
    persistence::{InMemoryRunRepository, RunRepository},
    providers::{CompanyProvider, EmailProvider, FindRequest},
};
use leadcheck_model::{
    CompanyVerdict, EmailStatus, EmailVerdict, Lead, Run, RunFlags, RunRecord,
    TokenUsage,
};

pub const REQUIREMENT: &str = "B2B SaaS company with more than 50 employees";

/// Engine settings with zero delays so retries and redeliveries are instant.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry = RetryPolicy::fixed(4, Duration::ZERO);
    config.router.redelivery_delay_ms = 0;
    config
}

pub fn verdict(status: EmailStatus, email: &str) -> EmailVerdict {
    let mut verdict = EmailVerdict::rejected(status, "stub");
    verdict.email = Some(email.to_string());
    verdict.reason = None;
    verdict
}

/// Email provider answering from fixed tables.
#[derive(Debug, Default)]
pub struct StubEmail {
    verified: Mutex<HashMap<String, EmailStatus>>,
    found: Mutex<Option<EmailVerdict>>,
    pub verify_calls: AtomicUsize,
    pub find_calls: AtomicUsize,
}

impl StubEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verified(self, email: &str, status: EmailStatus) -> Self {
        self.verified
            .lock()
            .expect("stub lock")
            .insert(email.to_string(), status);
        self
    }

    pub fn with_found(self, verdict: EmailVerdict) -> Self {
        *self.found.lock().expect("stub lock") = Some(verdict);
        self
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailProvider for StubEmail {
    async fn verify(&self, email: &str) -> Result<EmailVerdict> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .verified
            .lock()
            .expect("stub lock")
            .get(email)
            .cloned()
            .unwrap_or(EmailStatus::Invalid);
        Ok(verdict(status, email))
    }

    async fn find(&self, request: &FindRequest) -> Result<EmailVerdict> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let found = self.found.lock().expect("stub lock").clone();
        Ok(found.unwrap_or_else(|| {
            EmailVerdict::rejected(
                EmailStatus::Invalid,
                format!("no address found at {}", request.domain),
            )
        }))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum CompanyBehaviour {
    Approve,
    Reject,
    /// Every call fails with a 503.
    Unavailable,
}

/// Company checker with a fixed behaviour and an optional per-call delay.
#[derive(Debug)]
pub struct StubCompany {
    behaviour: CompanyBehaviour,
    delay: Duration,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl StubCompany {
    pub fn new(behaviour: CompanyBehaviour) -> Self {
        Self {
            behaviour,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most checks that were ever in progress at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanyProvider for StubCompany {
    async fn check(&self, company: &str, _requirements: &str) -> Result<CompanyVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let usage = TokenUsage {
            prompt_tokens: 40,
            completion_tokens: 12,
            total_tokens: 52,
        };
        match self.behaviour {
            CompanyBehaviour::Approve => Ok(CompanyVerdict {
                valid: true,
                reasoning: format!("{company} meets the requirements"),
                usage,
                cached: false,
            }),
            CompanyBehaviour::Reject => Ok(CompanyVerdict {
                valid: false,
                reasoning: format!("{company} does not meet the requirements"),
                usage,
                cached: false,
            }),
            CompanyBehaviour::Unavailable => Err(LeadError::HttpStatus {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                url: "https://checker.invalid/chat/completions".to_string(),
            }),
        }
    }
}

/// Runtime over in-memory stores and stub providers.
pub struct Harness {
    pub runtime: ValidatorRuntime,
    pub repo: Arc<InMemoryRunRepository>,
    pub cache: Arc<InMemoryCacheStore>,
    pub log: Arc<InMemoryStepLog>,
    pub email: Arc<StubEmail>,
    pub company: Arc<StubCompany>,
}

impl Harness {
    pub async fn start(email: StubEmail, company: StubCompany) -> Self {
        Self::start_with(test_config(), email, company).await
    }

    pub async fn start_with(
        config: EngineConfig,
        email: StubEmail,
        company: StubCompany,
    ) -> Self {
        let repo = Arc::new(InMemoryRunRepository::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let log = Arc::new(InMemoryStepLog::new());
        let email = Arc::new(email);
        let company = Arc::new(company);

        let runtime = ValidatorRuntime::start(
            config,
            RuntimeServices {
                repo: repo.clone(),
                cache: cache.clone(),
                step_log: log.clone(),
                email: email.clone(),
                company: company.clone(),
            },
        )
        .await;

        Self {
            runtime,
            repo,
            cache,
            log,
            email,
            company,
        }
    }

    /// Inserts a queued run with one record per lead.
    pub async fn seed_run(&self, flags: RunFlags, leads: Vec<Lead>) -> (Run, Vec<RunRecord>) {
        let run = Run::new(Some(REQUIREMENT.to_string()), flags);
        self.repo.insert_run(&run).await.expect("insert run");
        let records: Vec<RunRecord> = leads
            .into_iter()
            .map(|lead| RunRecord::new(run.id, lead))
            .collect();
        self.repo
            .insert_records(&records)
            .await
            .expect("insert records");
        (run, records)
    }

    pub async fn run(&self, run: &Run) -> Run {
        self.repo
            .get_run(run.id)
            .await
            .expect("get run")
            .expect("run exists")
    }

    pub async fn record(&self, record: &RunRecord) -> RunRecord {
        self.repo
            .get_record(record.id)
            .await
            .expect("get record")
            .expect("record exists")
    }
}

pub fn lead(email: &str, website: &str) -> Lead {
    Lead {
        email: Some(email.to_string()),
        first_name: Some("Jane".to_string()),
        last_name: Some("Doe".to_string()),
        company_name: Some("Acme".to_string()),
        website: Some(website.to_string()),
    }
}
