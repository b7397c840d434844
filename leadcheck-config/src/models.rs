use std::{fmt, path::PathBuf, str::FromStr};

use leadcheck_core::{
    engine::EngineConfig,
    providers::{LeadMagicSettings, ReasoningSettings},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CACHE_DIR: &str = "cache/validators";

/// Where validator responses are cached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Postgres,
    Disk,
    Memory,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackend::Postgres => "postgres",
            CacheBackend::Disk => "disk",
            CacheBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(CacheBackend::Postgres),
            "disk" => Ok(CacheBackend::Disk),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(format!(
                "expected one of postgres, disk, memory; got '{other}'"
            )),
        }
    }
}

/// Fully resolved worker configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub cache_backend: CacheBackend,
    pub cache_dir: PathBuf,
    pub leadmagic: LeadMagicSettings,
    pub reasoning: ReasoningSettings,
    pub engine: EngineConfig,
    /// File the configuration was read from, if any.
    pub source_path: Option<PathBuf>,
}

impl WorkerConfig {
    /// Database URL with the password masked, for logging.
    pub fn redacted_database_url(&self) -> String {
        match url::Url::parse(&self.database_url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "<unparseable>".to_string(),
        }
    }
}
