use std::sync::Arc;

use async_trait::async_trait;
use leadcheck_model::{EmailStatus, EmailVerdict, RunRecordId};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::cache::{CacheKey, normalize_website};
use crate::engine::{StepContext, Workflow, WorkflowKind};
use crate::error::Result;
use crate::events::{DomainEvent, EmailRequest, EventName};
use crate::persistence::{Guard, RecordPatch};
use crate::providers::FindRequest;

use super::WorkflowDeps;

static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// Syntactic address check; no DNS or mailbox lookups.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

fn domain_of(website: &str) -> String {
    normalize_website(website)
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|value| value.trim()).filter(|value| !value.is_empty())
}

/// `email-validation-api`: provider verification behind the cache.
#[derive(Debug)]
pub struct EmailValidationApi {
    deps: WorkflowDeps,
}

impl EmailValidationApi {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for EmailValidationApi {
    type Input = EmailRequest;
    type Output = EmailVerdict;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::EmailValidationApi
    }

    fn trigger(&self) -> EventName {
        EventName::EmailValidateApi
    }

    fn accept(&self, event: &DomainEvent) -> Option<EmailRequest> {
        match event {
            DomainEvent::EmailValidateApi(request) => Some(request.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: EmailRequest) -> Result<EmailVerdict> {
        let Some(email) = present(input.run_record.lead.email.as_ref()) else {
            return Ok(EmailVerdict::rejected(
                EmailStatus::Invalid,
                "No email provided for email validation",
            ));
        };

        let deps = &self.deps;
        let key = CacheKey::email_validation(email);
        let key = &key;
        let ignore_cache = input.ignore_cache;

        let cached: Option<EmailVerdict> = ctx
            .run("check-cache", move || async move {
                Ok(deps.cache.lookup(key, ignore_cache).await)
            })
            .await?;
        if let Some(hit) = cached {
            debug!(run_record_id = %input.run_record.id, "email verification served from cache");
            return Ok(hit.with_cached(true));
        }

        let verdict = ctx
            .run("make-api-call", move || async move {
                deps.email.verify(email).await
            })
            .await?;

        let fresh = &verdict;
        ctx.run("cache-result", move || async move {
            deps.cache.upsert_best_effort(key, fresh).await;
            Ok(())
        })
        .await?;

        Ok(verdict.with_cached(false))
    }
}

/// `email-finding-api`: resolve an address from name and company website.
#[derive(Debug)]
pub struct EmailFindingApi {
    deps: WorkflowDeps,
}

impl EmailFindingApi {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for EmailFindingApi {
    type Input = EmailRequest;
    type Output = EmailVerdict;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::EmailFindingApi
    }

    fn trigger(&self) -> EventName {
        EventName::EmailFindApi
    }

    fn accept(&self, event: &DomainEvent) -> Option<EmailRequest> {
        match event {
            DomainEvent::EmailFindApi(request) => Some(request.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: EmailRequest) -> Result<EmailVerdict> {
        let lead = &input.run_record.lead;
        let (Some(first_name), Some(last_name)) =
            (present(lead.first_name.as_ref()), present(lead.last_name.as_ref()))
        else {
            return Ok(EmailVerdict::rejected(
                EmailStatus::Invalid,
                "No first name or last name provided for email finding",
            ));
        };
        let Some(website) = present(lead.website.as_ref()) else {
            return Ok(EmailVerdict::rejected(
                EmailStatus::Invalid,
                "No website provided for email finding",
            ));
        };

        let request = FindRequest {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            company_name: present(lead.company_name.as_ref()).map(str::to_string),
            domain: domain_of(website),
        };
        let key = CacheKey::email_finding(
            &request.first_name,
            &request.last_name,
            request.company_name.as_deref(),
            &request.domain,
        );

        let deps = &self.deps;
        let key = &key;
        let request = &request;
        let ignore_cache = input.ignore_cache;

        let cached: Option<EmailVerdict> = ctx
            .run("check-cache", move || async move {
                Ok(deps.cache.lookup(key, ignore_cache).await)
            })
            .await?;
        if let Some(hit) = cached {
            debug!(run_record_id = %input.run_record.id, "email finding served from cache");
            return Ok(hit.with_cached(true));
        }

        let verdict = ctx
            .run("make-api-call", move || async move {
                deps.email.find(request).await
            })
            .await?;

        let fresh = &verdict;
        ctx.run("cache-result", move || async move {
            deps.cache.upsert_best_effort(key, fresh).await;
            Ok(())
        })
        .await?;

        Ok(verdict.with_cached(false))
    }
}

/// `validate-email`: regex check, then verification, then finding as the
/// fallback. Each intermediate result is written to the record.
#[derive(Debug)]
pub struct ValidateEmail {
    deps: WorkflowDeps,
    verify: Arc<EmailValidationApi>,
    find: Arc<EmailFindingApi>,
}

impl ValidateEmail {
    pub fn new(
        deps: WorkflowDeps,
        verify: Arc<EmailValidationApi>,
        find: Arc<EmailFindingApi>,
    ) -> Self {
        Self { deps, verify, find }
    }

    async fn store(
        &self,
        ctx: &StepContext,
        step: &str,
        id: RunRecordId,
        patch: RecordPatch,
    ) -> Result<()> {
        let repo = self.deps.repo.as_ref();
        let patch = &patch.guarded(Guard::NotTerminal);
        ctx.run(step, move || async move {
            repo.update_record(id, patch).await.map(|_| ())
        })
        .await
    }

    async fn find_and_store(
        &self,
        ctx: &StepContext,
        input: &EmailRequest,
    ) -> Result<EmailVerdict> {
        let found = ctx
            .invoke("email-finding-api", self.find.as_ref(), input.clone())
            .await?;
        let patch = RecordPatch {
            email_finding_result: Some(Some(found.clone())),
            ..RecordPatch::default()
        };
        self.store(ctx, "store-email-finding", input.run_record.id, patch)
            .await?;
        Ok(found)
    }
}

#[async_trait]
impl Workflow for ValidateEmail {
    type Input = EmailRequest;
    type Output = EmailVerdict;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ValidateEmail
    }

    fn trigger(&self) -> EventName {
        EventName::EmailValidate
    }

    fn accept(&self, event: &DomainEvent) -> Option<EmailRequest> {
        match event {
            DomainEvent::EmailValidate(request) => Some(request.clone()),
            _ => None,
        }
    }

    async fn run(&self, ctx: &StepContext, input: EmailRequest) -> Result<EmailVerdict> {
        let id = input.run_record.id;
        let email = input.run_record.lead.email.as_deref().unwrap_or_default().trim();

        let regex_valid = ctx
            .run("regex-validation", move || async move {
                Ok(is_valid_email(email))
            })
            .await?;
        self.store(
            ctx,
            "update-regex-valid",
            id,
            RecordPatch {
                regex_valid: Some(Some(regex_valid)),
                ..RecordPatch::default()
            },
        )
        .await?;

        if !regex_valid {
            info!(run_record_id = %id, "email failed the syntax check; falling back to finding");
            return self.find_and_store(ctx, &input).await;
        }

        let verified = ctx
            .invoke("email-validation-api", self.verify.as_ref(), input.clone())
            .await?;
        self.store(
            ctx,
            "store-email-validation",
            id,
            RecordPatch {
                email_validation_result: Some(Some(verified.clone())),
                ..RecordPatch::default()
            },
        )
        .await?;

        if verified.status.is_deliverable() {
            return Ok(verified);
        }

        info!(
            run_record_id = %id,
            status = %verified.status,
            "verification not deliverable; falling back to finding"
        );
        self.find_and_store(ctx, &input).await
    }
}
