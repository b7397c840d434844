//! # Leadcheck Worker
//!
//! Runs the lead validation workflows against Postgres. On start it applies
//! migrations, resumes executions left unfinished by a previous process,
//! then serves events until interrupted.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use leadcheck_config::{
    CacheBackend, ConfigLoad, ConfigLoader, WorkerConfig,
};
use leadcheck_core::{
    RuntimeServices, ValidatorRuntime,
    cache::{CacheStore, DiskCacheStore, InMemoryCacheStore, PostgresCacheStore},
    engine::PostgresStepLog,
    events::{EventEnvelope, EventPublisher},
    persistence::{MIGRATOR, PostgresRunRepository},
    providers::{LeadMagicClient, ReasoningClient},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "leadcheck-worker")]
#[command(about = "Durable batch lead validation worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Path to a TOML or JSON configuration file
    #[arg(long, env = "LEADCHECK_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Maximum Postgres connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
    /// Publish one event, wait until every execution it causes has
    /// finished, and exit
    Publish {
        /// Event name, e.g. `run.queued`
        name: String,
        /// JSON payload, e.g. '{"run_id": "..."}'
        data: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing().context("failed to install tracing subscriber")?;
    let config = load_config(&cli.config)?;
    let pool = connect(&config, cli.config.max_connections).await?;

    match cli.command {
        Some(Command::Migrate) => {
            info!("database migrations applied");
            Ok(())
        }
        Some(Command::Publish { name, data }) => publish_once(config, pool, &name, &data).await,
        None => serve(config, pool).await,
    }
}

/// Installs the global subscriber before anything can fail, so
/// configuration errors are logged through it too.
fn init_tracing() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leadcheck_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<WorkerConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path.clone());
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path.clone());
    }
    let ConfigLoad { config, warnings } = match loader.load() {
        Ok(load) => load,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return Err(err).context("failed to load configuration");
        }
    };

    if let Some(path) = &config.source_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings {
        warn!(message = %warning, "configuration warning");
    }
    info!(
        database = %config.redacted_database_url(),
        cache.backend = %config.cache_backend,
        record.concurrency = ?config.engine.record.concurrency,
        record.start_timeout_ms = ?config.engine.record.start_timeout_ms,
        record.finish_timeout_ms = ?config.engine.record.finish_timeout_ms,
        page_size = config.engine.page_size,
        "worker configuration in effect"
    );
    Ok(config)
}

async fn connect(config: &WorkerConfig, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    Ok(pool)
}

fn cache_store(config: &WorkerConfig, pool: &PgPool) -> Arc<dyn CacheStore> {
    match config.cache_backend {
        CacheBackend::Postgres => Arc::new(PostgresCacheStore::new(pool.clone())),
        CacheBackend::Disk => {
            info!(dir = %config.cache_dir.display(), "using on-disk validator cache");
            Arc::new(DiskCacheStore::new(config.cache_dir.clone()))
        }
        CacheBackend::Memory => Arc::new(InMemoryCacheStore::new()),
    }
}

async fn start_runtime(config: WorkerConfig, pool: PgPool) -> anyhow::Result<ValidatorRuntime> {
    let email = LeadMagicClient::new(&config.leadmagic)
        .context("failed to build the email provider client")?;
    let company = ReasoningClient::new(config.reasoning.clone())
        .context("failed to build the company checker client")?;

    let services = RuntimeServices {
        repo: Arc::new(PostgresRunRepository::new(pool.clone())),
        cache: cache_store(&config, &pool),
        step_log: Arc::new(PostgresStepLog::new(pool)),
        email: Arc::new(email),
        company: Arc::new(company),
    };
    Ok(ValidatorRuntime::start(config.engine, services).await)
}

async fn serve(config: WorkerConfig, pool: PgPool) -> anyhow::Result<()> {
    let runtime = start_runtime(config, pool).await?;
    runtime
        .resume_incomplete()
        .await
        .context("failed to resume unfinished executions")?;

    info!("worker ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    runtime.shutdown().await;
    info!("worker stopped");
    Ok(())
}

async fn publish_once(
    config: WorkerConfig,
    pool: PgPool,
    name: &str,
    data: &str,
) -> anyhow::Result<()> {
    let data = serde_json::from_str(data).context("event payload is not valid JSON")?;
    let envelope = EventEnvelope::decode(None, name, data)?;

    let runtime = start_runtime(config, pool).await?;
    let id = runtime.router().publish_envelope(envelope).await?;
    info!(event = name, event_id = %id, "event published; waiting for executions");

    tokio::select! {
        _ = runtime.settle() => info!("all executions finished"),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; unfinished executions resume on next start");
            runtime.shutdown().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_reach_an_installed_subscriber() {
        init_tracing().expect("first subscriber install");

        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/leadcheck.toml")),
            env_file: None,
            max_connections: 1,
        };
        let err = load_config(&args).expect_err("missing config file");
        assert!(err.to_string().contains("failed to load configuration"));

        // Loading must not try to install a second global subscriber.
        assert!(init_tracing().is_err());
    }

    #[test]
    fn publish_takes_a_name_and_payload() {
        let cli = Cli::parse_from(["leadcheck-worker", "publish", "run.cancelled", "{}"]);
        assert!(matches!(
            cli.command,
            Some(Command::Publish { ref name, .. }) if name == "run.cancelled"
        ));
    }
}
