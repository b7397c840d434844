//! Run and record storage.
//!
//! The store offers point reads, paginated range reads filtered on status,
//! and single-row conditional updates. There are no multi-row transactions;
//! callers rely on idempotent whole-value writes.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod repository;

pub use memory::InMemoryRunRepository;
#[cfg(feature = "database")]
pub use postgres::{MIGRATOR, PostgresRunRepository};
pub use repository::*;
