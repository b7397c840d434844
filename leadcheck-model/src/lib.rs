//! Core data model definitions shared across the lead validation crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod record;
pub mod run;
pub mod verdict;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{RunId, RunRecordId};
pub use record::{Lead, RecordField, RunRecord, RunRecordStatus};
pub use run::{Run, RunFlags, RunStatus};
pub use verdict::{
    CompanyVerdict, EmailRouting, EmailStatus, EmailVerdict, TokenUsage,
};
