use std::sync::Arc;

use async_trait::async_trait;
use leadcheck_model::CompanyVerdict;
use tracing::debug;

use crate::cache::CacheKey;
use crate::engine::{StepContext, Workflow, WorkflowKind};
use crate::error::Result;
use crate::events::{CompanyRequest, DomainEvent, EventName};

use super::WorkflowDeps;

pub const MISSING_INPUTS_REASONING: &str = "Missing website or requirements";
pub const MISSING_REQUIREMENTS_REASONING: &str =
    "No requirements found for run record";

/// `company-validation-api`: one call to the company checker, no cache.
#[derive(Debug)]
pub struct CompanyValidationApi {
    deps: WorkflowDeps,
}

impl CompanyValidationApi {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for CompanyValidationApi {
    type Input = CompanyRequest;
    type Output = CompanyVerdict;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::CompanyValidationApi
    }

    fn trigger(&self) -> EventName {
        EventName::CompanyValidateApi
    }

    fn accept(&self, event: &DomainEvent) -> Option<CompanyRequest> {
        match event {
            DomainEvent::CompanyValidateApi(request) => Some(request.clone()),
            _ => None,
        }
    }

    async fn run(
        &self,
        ctx: &StepContext,
        input: CompanyRequest,
    ) -> Result<CompanyVerdict> {
        let (Some(website), Some(requirements)) =
            (input.website(), input.requirements())
        else {
            return Ok(CompanyVerdict::rejected(MISSING_INPUTS_REASONING));
        };

        let company = self.deps.company.as_ref();
        ctx.run("make-api-call", move || async move {
            company.check(website, requirements).await
        })
        .await
    }
}

/// `validate-company`: cache-keyed on website plus requirement digest; a
/// miss calls the checker and overwrites the entry.
#[derive(Debug)]
pub struct ValidateCompany {
    deps: WorkflowDeps,
    api: Arc<CompanyValidationApi>,
}

impl ValidateCompany {
    pub fn new(deps: WorkflowDeps, api: Arc<CompanyValidationApi>) -> Self {
        Self { deps, api }
    }
}

#[async_trait]
impl Workflow for ValidateCompany {
    type Input = CompanyRequest;
    type Output = CompanyVerdict;

    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ValidateCompany
    }

    fn trigger(&self) -> EventName {
        EventName::CompanyValidate
    }

    fn accept(&self, event: &DomainEvent) -> Option<CompanyRequest> {
        match event {
            DomainEvent::CompanyValidate(request) => Some(request.clone()),
            _ => None,
        }
    }

    async fn run(
        &self,
        ctx: &StepContext,
        input: CompanyRequest,
    ) -> Result<CompanyVerdict> {
        let Some(requirements) = input.requirements() else {
            return Ok(CompanyVerdict::rejected(MISSING_REQUIREMENTS_REASONING));
        };
        let Some(website) = input.website() else {
            return Ok(CompanyVerdict::rejected(MISSING_INPUTS_REASONING));
        };

        let deps = &self.deps;
        let key = CacheKey::company_validation(website, requirements);
        let key = &key;
        let ignore_cache = input.ignore_cache;

        let cached: Option<CompanyVerdict> = ctx
            .run("check-cache", move || async move {
                Ok(deps.cache.lookup(key, ignore_cache).await)
            })
            .await?;
        if let Some(hit) = cached {
            debug!(website, "company check served from cache");
            return Ok(hit.with_cached(true));
        }

        let request = CompanyRequest {
            run_record: None,
            website: Some(website.to_string()),
            requirements: Some(requirements.to_string()),
            ignore_cache,
        };
        let verdict = ctx
            .invoke("validate-company-api", self.api.as_ref(), request)
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
