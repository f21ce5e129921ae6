//! Notification worker.
//!
//! Pops per-record outcome events from a Redis list and folds them into
//! task state stored in PostgreSQL.

mod consumer;
mod queue;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tallyflow_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use tallyflow_core::{
    notification::{NotificationEngine, error_report},
    reconcile::synchronize,
    storage::{Stores, TaskInfoStore, postgres::PostgresStorage},
    worker::NotificationWorker,
};
use tallyflow_model::TaskId;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    consumer::consume,
    queue::{RedisDeadLetterSink, RedisEventQueue},
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "tallyflow-worker")]
#[command(about = "Aggregates per-record outcome events into task state")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to an env file read before the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile the task index, then consume events (default)
    Run,
    /// Reconcile the task index of the configured topics and exit
    Reconcile,
    /// Print counters and the error report of one task as JSON
    Report {
        task_id: i64,
        /// Samples listed per error signature
        #[arg(long, default_value_t = 10)]
        samples: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.config)?;

    let storage = PostgresStorage::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("failed to connect to PostgreSQL")?;
    storage
        .initialize_schema()
        .await
        .context("database migration failed")?;
    let stores = Stores::from_postgres(&storage);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            reconcile(&config, &stores).await?;
            run_worker(&config, stores).await
        }
        Command::Reconcile => reconcile(&config, &stores).await,
        Command::Report { task_id, samples } => {
            report(&stores, TaskId(task_id), samples).await
        }
    }
}

fn load_runtime_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config.clone(),
            env_file: args.env_file.clone(),
        })
        .load()
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tallyflow_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        topology = %config.topology.name,
        topics = ?config.topology.topics,
        retries = config.retry.retries,
        cache_capacity = config.engine.cache_capacity,
        processed_buckets = config.buckets.processed_records.get(),
        notification_bucket_size = config.buckets.notification_bucket_size,
        "worker configuration in effect"
    );

    Ok(config)
}

async fn reconcile(config: &Config, stores: &Stores) -> anyhow::Result<()> {
    if config.topology.topics.is_empty() {
        return Ok(());
    }

    let corrected = synchronize(
        stores,
        config.retry.storage_policy(),
        &config.topology.name,
        &config.topology.topics,
    )
    .await
    .context("task index reconciliation failed")?;
    info!(corrected, topology = %config.topology.name, "task index reconciled");
    Ok(())
}

async fn run_worker(config: &Config, stores: Stores) -> anyhow::Result<()> {
    let conn = queue::connect(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;

    let dead_letters =
        RedisDeadLetterSink::new(conn.clone(), config.redis.dead_letter_key.clone());
    let engine = NotificationEngine::new(stores, config.engine_config())
        .with_dead_letters(Arc::new(dead_letters));
    let mut worker = NotificationWorker::new(engine);
    let mut queue = RedisEventQueue::new(
        conn,
        config.redis.queue_key.clone(),
        config.redis.poll_timeout,
    );

    info!(queue = %config.redis.queue_key, "consuming notification events");

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, finishing the current event");
                let _ = stop.send(true);
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for ctrl-c");
                // Holds the sender so the consumer never sees it close.
                std::future::pending::<()>().await;
            }
        }
    });

    let stats =
        consume(&mut worker, &mut queue, config.redis.poll_timeout, shutdown)
            .await;

    info!(
        recorded = stats.recorded,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        dropped = stats.dropped,
        lost = stats.lost,
        "worker stopped"
    );
    Ok(())
}

async fn report(stores: &Stores, task_id: TaskId, samples: i64) -> anyhow::Result<()> {
    let info = TaskInfoStore::find(stores.tasks.as_ref(), task_id)
        .await
        .context("failed to load task")?
        .with_context(|| format!("task {task_id} not found"))?;
    let errors = error_report(stores.errors.as_ref(), task_id, samples)
        .await
        .context("failed to load error report")?;

    let errors: Vec<serde_json::Value> = errors
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "errorType": entry.error_type.error_type,
                "message": entry.error_type.message,
                "occurrences": entry.error_type.count,
                "samples": entry.samples,
            })
        })
        .collect();
    let document = serde_json::json!({ "task": info, "errors": errors });

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["tallyflow-worker"]).expect("parse");
        assert!(cli.command.is_none());
        assert!(cli.config.config.is_none());
    }

    #[test]
    fn report_takes_a_task_id_and_global_flags() {
        let cli = Cli::try_parse_from([
            "tallyflow-worker",
            "report",
            "111",
            "--samples",
            "3",
            "--config",
            "/etc/tallyflow.toml",
        ])
        .expect("parse");

        assert!(matches!(
            cli.command,
            Some(Command::Report {
                task_id: 111,
                samples: 3
            })
        ));
        assert_eq!(
            cli.config.config.as_deref(),
            Some(std::path::Path::new("/etc/tallyflow.toml"))
        );
    }
}
