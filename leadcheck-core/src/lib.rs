//! # Leadcheck Core
//!
//! Durable orchestration for batch lead validation.
//!
//! A *run* is a batch of lead records. Publishing `run.queued` starts a
//! fan-out that queues one record validation per record; each record
//! validation checks the email syntax, resolves a deliverable address
//! through the email provider (verification, then finding as fallback),
//! asks the company checker whether the company meets the run's
//! requirement, and writes the outcome back to the record. The run is
//! marked complete once every record is terminal.
//!
//! ## Modules
//!
//! - [`engine`]: durable workflow engine (step log, retries, concurrency
//!   gates, timeouts, cancellation by correlated event)
//! - [`events`]: the closed set of domain events and the in-process router
//! - [`cache`]: validator response cache with memory, disk and Postgres
//!   stores
//! - [`providers`]: HTTP adapters for the email and company validators
//! - [`persistence`]: run and record storage
//! - [`workflows`]: the record validator, run orchestrator and validator
//!   sub-workflows
//! - [`runtime`]: wiring of all of the above into one process
//!
//! ## Feature Flags
//!
//! - `database`: Postgres-backed repository, cache tables and step log

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod events;
pub mod persistence;
pub mod providers;
pub mod runtime;
pub mod workflows;

pub use error::{FailureClass, LeadError, Result};
pub use runtime::{RuntimeServices, ValidatorRuntime};
