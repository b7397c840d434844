//! Configuration loading for the lead validation worker.
//!
//! Sources are layered in a fixed order: a `.env` file (via `dotenvy`), an
//! optional TOML or JSON file, then individual environment variables. Later
//! layers win. Environment lookups go through [`EnvSource`] so tests can
//! supply a map instead of mutating the process environment.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{CacheBackend, WorkerConfig};
pub use sources::{EnvSource, FileConfig, MapEnv, ProcessEnv};
