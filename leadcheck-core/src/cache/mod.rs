//! Content-addressed cache for validator responses.
//!
//! Keys are fingerprints over the semantically relevant part of a validator
//! input; payloads are the last response seen for that input. Writes are
//! upserts, so a forced re-validation refreshes the entry for later callers.

pub mod disk;
pub mod key;
pub mod manager;
pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use disk::*;
pub use key::*;
pub use manager::*;
pub use memory::*;
#[cfg(feature = "database")]
pub use postgres::*;
