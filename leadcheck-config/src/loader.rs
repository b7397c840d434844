use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    models::{CacheBackend, DEFAULT_CACHE_DIR, WorkerConfig},
    sources::{EnvConfig, EnvSource, FileConfig, ProcessEnv},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["leadcheck.toml", "config/leadcheck.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Builds a [`WorkerConfig`] from `.env`, an optional config file and the
/// environment.
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
    env: Arc<dyn EnvSource>,
    read_env_file: bool,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("options", &self.options)
            .field("read_env_file", &self.read_env_file)
            .finish()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            options: ConfigLoaderOptions::default(),
            env: Arc::new(ProcessEnv),
            read_env_file: true,
        }
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: WorkerConfig,
    pub warnings: Vec<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Reads variables from `env` instead of the process environment. No
    /// `.env` file is loaded in this mode.
    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self.read_env_file = false;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = Vec::new();

        if self.read_env_file {
            let loaded = match &self.options.env_file {
                Some(path) => dotenvy::from_path(path).map(|_| true),
                None => dotenvy::dotenv().map(|_| true),
            }
            .or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?;
            debug!(loaded, ".env processed");
        }

        let env = EnvConfig::gather(self.env.as_ref());
        let (file, source_path) = self.load_file_config(&env)?;
        if source_path.is_none() {
            warnings.push(
                "No leadcheck.toml detected; using defaults and environment variables"
                    .to_string(),
            );
        }

        let config = compose(file, env, source_path, &mut warnings)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(FileConfig, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if path.exists() => path,
            Some(path) => return Err(ConfigLoadError::MissingConfig { path }),
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((FileConfig::default(), None)),
            },
        };

        let file = read_file_config(&path)?;
        debug!(path = %path.display(), "configuration file loaded");
        Ok((file, Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&contents).map_err(|source| ConfigLoadError::ParseJson {
            path: path.to_path_buf(),
            source,
        })
    } else {
        toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_duration(key: &'static str, raw: &str) -> Result<u64, ConfigLoadError> {
    humantime::parse_duration(raw)
        .map(|duration: Duration| duration.as_millis() as u64)
        .map_err(|err| ConfigLoadError::InvalidValue {
            key,
            reason: err.to_string(),
        })
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    source_path: Option<PathBuf>,
    warnings: &mut Vec<String>,
) -> Result<WorkerConfig, ConfigLoadError> {
    let FileConfig {
        database_url,
        cache,
        mut leadmagic,
        mut reasoning,
        mut engine,
    } = file;

    let database_url = env.database_url.or(database_url).unwrap_or_default();

    if let Some(key) = env.leadmagic_api_key {
        leadmagic.api_key = key;
    }
    if let Some(url) = env.leadmagic_base_url {
        leadmagic.base_url = url;
    }
    if let Some(key) = env.perplexity_api_key {
        reasoning.api_key = key;
    }
    if let Some(url) = env.perplexity_api_url {
        reasoning.api_url = url;
    }

    let mut missing = Vec::new();
    if database_url.trim().is_empty() {
        missing.push("DATABASE_URL");
    }
    if leadmagic.api_key.trim().is_empty() {
        missing.push("LEADMAGIC_API_KEY");
    }
    if reasoning.api_key.trim().is_empty() {
        missing.push("PERPLEXITY_API_KEY");
    }
    if !missing.is_empty() {
        return Err(ConfigLoadError::MissingSecrets { keys: missing });
    }

    Url::parse(&database_url)
        .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;

    if let Some(raw) = env.record_concurrency {
        let concurrency: usize =
            raw.parse().map_err(|_| ConfigLoadError::InvalidValue {
                key: "RECORD_CONCURRENCY",
                reason: format!("'{raw}' is not a positive integer"),
            })?;
        if concurrency == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "RECORD_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        engine.record.concurrency = Some(concurrency);
    }
    if let Some(raw) = env.record_start_timeout {
        engine.record.start_timeout_ms = Some(parse_duration("RECORD_START_TIMEOUT", &raw)?);
    }
    if let Some(raw) = env.record_finish_timeout {
        engine.record.finish_timeout_ms =
            Some(parse_duration("RECORD_FINISH_TIMEOUT", &raw)?);
    }
    if engine.page_size == 0 {
        warnings.push("engine.page_size of 0 raised to 1".to_string());
        engine.page_size = 1;
    }

    let cache_backend = match env.cache_backend {
        Some(raw) => raw.parse::<CacheBackend>().map_err(|reason| {
            ConfigLoadError::InvalidValue {
                key: "CACHE_BACKEND",
                reason,
            }
        })?,
        None => cache.backend.unwrap_or_default(),
    };
    let cache_dir = env
        .cache_dir
        .or(cache.dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if cache_backend == CacheBackend::Memory {
        warnings.push(
            "memory cache backend selected; cached validator responses are lost on restart"
                .to_string(),
        );
    }

    Ok(WorkerConfig {
        database_url,
        cache_backend,
        cache_dir,
        leadmagic,
        reasoning,
        engine,
        source_path,
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse configuration {path}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required settings: {}", keys.join(", "))]
    MissingSecrets { keys: Vec<&'static str> },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
