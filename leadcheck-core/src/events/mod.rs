//! Closed set of domain events and the in-process router that delivers them.

pub mod router;
pub mod types;

pub use router::*;
pub use types::*;
