use std::{fmt, sync::Arc};

use tracing::{info, warn};

use crate::cache::{CacheManager, CacheStore};
use crate::engine::{
    EngineConfig, ExecutionRecord, StepLog, Workflow, WorkflowEngine,
    WorkflowKind, WorkflowTrigger,
};
use crate::error::Result;
use crate::events::{DomainEvent, EventId, EventPublisher, InProcEventRouter};
use crate::persistence::RunRepository;
use crate::providers::{CompanyProvider, EmailProvider};
use crate::workflows::{
    CancelRunWorkflow, CompanyValidationApi, EmailFindingApi,
    EmailValidationApi, ProcessRunWorkflow, RecordValidationWorkflow,
    RetriggerStuckWorkflow, UpdateRecordWorkflow, ValidateCompany,
    ValidateEmail, WorkflowDeps,
};

/// Storage and provider backends the runtime is assembled from.
#[derive(Clone)]
pub struct RuntimeServices {
    pub repo: Arc<dyn RunRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub step_log: Arc<dyn StepLog>,
    pub email: Arc<dyn EmailProvider>,
    pub company: Arc<dyn CompanyProvider>,
}

impl fmt::Debug for RuntimeServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeServices").finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Workflows {
    process_run: Arc<ProcessRunWorkflow>,
    cancel_run: Arc<CancelRunWorkflow>,
    retrigger: Arc<RetriggerStuckWorkflow>,
    update_record: Arc<UpdateRecordWorkflow>,
    record: Arc<RecordValidationWorkflow>,
    validate_email: Arc<ValidateEmail>,
    email_validation_api: Arc<EmailValidationApi>,
    email_finding_api: Arc<EmailFindingApi>,
    validate_company: Arc<ValidateCompany>,
    company_validation_api: Arc<CompanyValidationApi>,
}

impl Workflows {
    fn build(deps: WorkflowDeps) -> Self {
        let email_validation_api = Arc::new(EmailValidationApi::new(deps.clone()));
        let email_finding_api = Arc::new(EmailFindingApi::new(deps.clone()));
        let validate_email = Arc::new(ValidateEmail::new(
            deps.clone(),
            Arc::clone(&email_validation_api),
            Arc::clone(&email_finding_api),
        ));
        let company_validation_api = Arc::new(CompanyValidationApi::new(deps.clone()));
        let validate_company = Arc::new(ValidateCompany::new(
            deps.clone(),
            Arc::clone(&company_validation_api),
        ));
        let record = Arc::new(RecordValidationWorkflow::new(
            deps.clone(),
            Arc::clone(&validate_email),
            Arc::clone(&validate_company),
        ));

        Self {
            process_run: Arc::new(ProcessRunWorkflow::new(deps.clone())),
            cancel_run: Arc::new(CancelRunWorkflow::new(deps.clone())),
            retrigger: Arc::new(RetriggerStuckWorkflow::new(deps.clone())),
            update_record: Arc::new(UpdateRecordWorkflow::new(deps)),
            record,
            validate_email,
            email_validation_api,
            email_finding_api,
            validate_company,
            company_validation_api,
        }
    }
}

/// Everything a worker process runs: one engine, one router, and every
/// workflow subscribed to its trigger event.
pub struct ValidatorRuntime {
    engine: WorkflowEngine,
    router: Arc<InProcEventRouter>,
    repo: Arc<dyn RunRepository>,
    workflows: Workflows,
}

impl fmt::Debug for ValidatorRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRuntime")
            .field("engine", &self.engine)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl ValidatorRuntime {
    pub async fn start(config: EngineConfig, services: RuntimeServices) -> Self {
        let router = Arc::new(InProcEventRouter::new(config.router));
        let page_size = config.page_size;
        let engine = WorkflowEngine::new(config, services.step_log);

        let deps = WorkflowDeps {
            repo: Arc::clone(&services.repo),
            cache: CacheManager::new(services.cache),
            email: services.email,
            company: services.company,
            events: Arc::clone(&router) as Arc<dyn EventPublisher>,
            page_size,
        };

        let runtime = Self {
            engine,
            router,
            repo: services.repo,
            workflows: Workflows::build(deps),
        };

        let w = &runtime.workflows;
        runtime.subscribe(&w.process_run).await;
        runtime.subscribe(&w.cancel_run).await;
        runtime.subscribe(&w.retrigger).await;
        runtime.subscribe(&w.update_record).await;
        runtime.subscribe(&w.record).await;
        runtime.subscribe(&w.validate_email).await;
        runtime.subscribe(&w.email_validation_api).await;
        runtime.subscribe(&w.email_finding_api).await;
        runtime.subscribe(&w.validate_company).await;
        runtime.subscribe(&w.company_validation_api).await;
        runtime
            .router
            .observe(Arc::new(runtime.engine.clone()))
            .await;

        info!(
            workflows = WorkflowKind::ALL.len(),
            "validator runtime started"
        );
        runtime
    }

    async fn subscribe<W: Workflow>(&self, workflow: &Arc<W>) {
        let trigger = WorkflowTrigger::new(self.engine.clone(), Arc::clone(workflow));
        self.router
            .subscribe(workflow.trigger(), Arc::new(trigger))
            .await;
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn router(&self) -> &Arc<InProcEventRouter> {
        &self.router
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.repo
    }

    pub async fn publish(&self, event: DomainEvent) -> Result<EventId> {
        self.router.publish(event).await
    }

    /// Restarts every root execution the step log still lists as queued or
    /// running. Returns how many were restarted.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let pending = self.engine.step_log().incomplete().await?;
        let mut resumed = 0;

        for record in pending {
            let id = record.id.clone();
            let w = &self.workflows;
            let result = match record.kind {
                WorkflowKind::ProcessRun => self.resume(&w.process_run, record).await,
                WorkflowKind::ProcessRunRecord => self.resume(&w.record, record).await,
                WorkflowKind::CancelRun => self.resume(&w.cancel_run, record).await,
                WorkflowKind::RetriggerStuckRecords => {
                    self.resume(&w.retrigger, record).await
                }
                WorkflowKind::UpdateRunRecord => {
                    self.resume(&w.update_record, record).await
                }
                WorkflowKind::ValidateEmail => {
                    self.resume(&w.validate_email, record).await
                }
                WorkflowKind::EmailValidationApi => {
                    self.resume(&w.email_validation_api, record).await
                }
                WorkflowKind::EmailFindingApi => {
                    self.resume(&w.email_finding_api, record).await
                }
                WorkflowKind::ValidateCompany => {
                    self.resume(&w.validate_company, record).await
                }
                WorkflowKind::CompanyValidationApi => {
                    self.resume(&w.company_validation_api, record).await
                }
            };

            match result {
                Ok(()) => resumed += 1,
                Err(err) => warn!(execution_id = %id, error = %err, "could not resume execution"),
            }
        }

        if resumed > 0 {
            info!(resumed, "resumed unfinished executions");
        }
        Ok(resumed)
    }

    async fn resume<W: Workflow>(
        &self,
        workflow: &Arc<W>,
        record: ExecutionRecord,
    ) -> Result<()> {
        let input: W::Input = serde_json::from_value(record.input)?;
        self.engine
            .execute(Arc::clone(workflow), record.id, input)
            .await?;
        Ok(())
    }

    /// Waits until no delivery and no execution is in flight, including
    /// the ones they start while being waited on.
    pub async fn settle(&self) {
        loop {
            self.router.drain().await;
            self.engine.wait_idle().await;
            if self.router.in_flight() == 0 && self.engine.in_flight() == 0 {
                return;
            }
        }
    }

    /// Cancels running executions at their next step boundary and waits for
    /// them. Interrupted executions resume on the next start.
    pub async fn shutdown(&self) {
        info!("shutting down validator runtime");
        self.engine.shutdown().await;
        self.router.drain().await;
    }
}
