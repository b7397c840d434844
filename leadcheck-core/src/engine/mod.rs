//! Durable workflow engine.
//!
//! A workflow is a sequence of named steps. Each step's output is written to
//! the [`StepLog`] keyed by `(execution id, step name)`, so re-running an
//! execution with the same id skips finished steps and continues from the
//! first unlogged one. The engine adds per-kind concurrency ceilings, start
//! and finish timeouts, per-step retries, and cancellation by correlated
//! event.

pub mod cancel;
pub mod config;
pub mod context;
pub mod executor;
pub mod gate;
pub mod step_log;
pub mod workflow;

pub use cancel::CancellationRegistry;
pub use config::*;
pub use context::StepContext;
pub use executor::*;
pub use gate::ConcurrencyGates;
pub use step_log::*;
pub use workflow::*;
