use std::{collections::HashMap, path::PathBuf};

use leadcheck_core::{
    engine::EngineConfig,
    providers::{LeadMagicSettings, ReasoningSettings},
};
use serde::{Deserialize, Serialize};

use crate::models::CacheBackend;

/// Read access to environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of variables.
#[derive(Clone, Debug, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MapEnv {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        )
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

/// Raw configuration as written in a TOML or JSON file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub cache: FileCacheConfig,
    pub leadmagic: LeadMagicSettings,
    pub reasoning: ReasoningSettings,
    pub engine: EngineConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<CacheBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Environment variables the loader understands, read once.
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub leadmagic_api_key: Option<String>,
    pub leadmagic_base_url: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub perplexity_api_url: Option<String>,
    pub record_concurrency: Option<String>,
    pub record_start_timeout: Option<String>,
    pub record_finish_timeout: Option<String>,
    pub cache_backend: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather(env: &dyn EnvSource) -> Self {
        let var = |name: &str| {
            env.var(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            config_path: var("LEADCHECK_CONFIG_PATH").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            leadmagic_api_key: var("LEADMAGIC_API_KEY"),
            leadmagic_base_url: var("LEADMAGIC_BASE_URL"),
            perplexity_api_key: var("PERPLEXITY_API_KEY"),
            perplexity_api_url: var("PERPLEXITY_API_URL"),
            record_concurrency: var("RECORD_CONCURRENCY"),
            record_start_timeout: var("RECORD_START_TIMEOUT"),
            record_finish_timeout: var("RECORD_FINISH_TIMEOUT"),
            cache_backend: var("CACHE_BACKEND"),
            cache_dir: var("CACHE_DIR").map(PathBuf::from),
        }
    }
}
