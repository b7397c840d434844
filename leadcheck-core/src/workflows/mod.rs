//! Workflow definitions: the record validator, the run orchestrator, and
//! the validator sub-workflows they invoke.

pub mod company;
pub mod completion;
pub mod email;
pub mod record;
pub mod run;
pub mod update;

pub use company::{CompanyValidationApi, ValidateCompany};
pub use completion::check_run_completion;
pub use email::{EmailFindingApi, EmailValidationApi, ValidateEmail};
pub use record::{RecordOutcome, RecordValidationWorkflow};
pub use run::{
    CancelRunWorkflow, FanOutSummary, ProcessRunWorkflow,
    RetriggerStuckWorkflow, SweepSummary,
};
pub use update::{FieldUpdate, UpdateRecordWorkflow};

use std::{fmt, sync::Arc};

use crate::cache::CacheManager;
use crate::events::EventPublisher;
use crate::persistence::RunRepository;
use crate::providers::{CompanyProvider, EmailProvider};

/// Collaborators shared by every workflow, constructed once at startup.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub repo: Arc<dyn RunRepository>,
    pub cache: CacheManager,
    pub email: Arc<dyn EmailProvider>,
    pub company: Arc<dyn CompanyProvider>,
    pub events: Arc<dyn EventPublisher>,
    /// Page size for fan-out and sweeps.
    pub page_size: usize,
}

impl fmt::Debug for WorkflowDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDeps")
            .field("cache", &self.cache)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
