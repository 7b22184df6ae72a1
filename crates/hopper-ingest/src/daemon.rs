//! Daemon assembly and lifecycle

use crate::config::{IngestConfig, OutcomeLogKind, SinkKind};
use crate::db::create_pool;
use crate::dispatcher::Dispatcher;
use crate::loader::Loader;
use crate::outcome::{JsonlOutcomeLog, OutcomeLog, PgOutcomeLog};
use crate::pipeline::Pipeline;
use crate::router::Router;
use crate::sink::memory::MemorySink;
use crate::sink::postgres::PgSink;
use crate::sink::Sink;
use crate::validator::Validator;
use crate::watcher::{WatchError, Watcher};
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Build the pipeline described by `config`, connecting to Postgres if needed
pub async fn connect(config: &IngestConfig) -> Result<Arc<Pipeline>> {
    let pool = if config.needs_database() {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to connect to the database")?;
        info!("Database connection pool established");
        Some(pool)
    } else {
        None
    };

    let sink: Arc<dyn Sink> = match (config.sink, &pool) {
        (SinkKind::Postgres, Some(pool)) => Arc::new(PgSink::new(pool.clone())),
        (SinkKind::Memory, _) => {
            warn!("Using the in-memory sink, loaded rows are not persisted");
            Arc::new(MemorySink::new())
        },
        (SinkKind::Postgres, None) => anyhow::bail!("Postgres sink selected without a pool"),
    };

    let outcomes = open_outcome_log(config, pool.as_ref()).await?;

    build(config, sink, outcomes)
}

/// Open the configured outcome log, creating its table when it lives in Postgres
pub async fn open_outcome_log(
    config: &IngestConfig,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn OutcomeLog>> {
    match (config.outcome_log, pool) {
        (OutcomeLogKind::Postgres, Some(pool)) => {
            let log = PgOutcomeLog::new(pool.clone());
            log.ensure_schema()
                .await
                .context("Failed to create the outcome table")?;
            Ok(Arc::new(log))
        },
        (OutcomeLogKind::File, _) => Ok(Arc::new(JsonlOutcomeLog::new(&config.outcome_log_path))),
        (OutcomeLogKind::Postgres, None) => {
            anyhow::bail!("Postgres outcome log selected without a pool")
        },
    }
}

/// Build a pipeline around an existing sink and outcome log
pub fn build(
    config: &IngestConfig,
    sink: Arc<dyn Sink>,
    outcomes: Arc<dyn OutcomeLog>,
) -> Result<Arc<Pipeline>> {
    let validator =
        Validator::new(config.validation.clone()).context("Invalid validation settings")?;
    let loader = Loader::new(
        sink,
        config.db_retry,
        config.table.clone(),
        config.validation.chunk_size,
    );
    let router = Router::new(
        config.layout.clone(),
        config.fs_retry,
        config.db_retry,
        outcomes,
    );

    Ok(Arc::new(Pipeline::new(validator, loader, router)))
}

/// Run the daemon until `shutdown` resolves or the watch is lost
///
/// Prepares the directories, recovers files a previous run left in the
/// processing directory, then watches and dispatches. Losing the watch is an
/// error; a requested shutdown drains in-flight files and returns `Ok`.
pub async fn serve<S>(pipeline: Arc<Pipeline>, config: &IngestConfig, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    config
        .layout
        .ensure()
        .await
        .context("Failed to create working directories")?;

    let recovered = pipeline
        .router()
        .recover_orphans()
        .await
        .context("Failed to recover orphaned files")?;
    if !recovered.is_empty() {
        info!(files = recovered.len(), "Returned orphaned files to the inbox");
    }

    info!(
        sink = pipeline.loader().sink().kind(),
        workers = config.dispatch.workers,
        "Ingestion daemon started"
    );

    let dispatcher = Dispatcher::start(Arc::clone(&pipeline), config.dispatch);
    let cancel = CancellationToken::new();
    let mut watcher = tokio::spawn(
        Watcher::new(config.watch_config())
            .with_recovered(recovered)
            .run(dispatcher.submitter(), cancel.clone()),
    );

    let watch_result: Result<(), WatchError> = tokio::select! {
        _ = shutdown => {
            info!("Shutdown requested");
            cancel.cancel();
            match watcher.await {
                Ok(result) => result,
                Err(err) => {
                    error!(error = %err, "Watcher task failed");
                    Ok(())
                },
            }
        },
        joined = &mut watcher => match joined {
            Ok(result) => result,
            Err(err) => Err(WatchError::Lost {
                path: config.layout.inbox.clone(),
                source: std::io::Error::other(err.to_string()),
            }),
        },
    };

    let drained = dispatcher.shutdown(config.shutdown_timeout).await;
    if !drained {
        warn!("Some files were abandoned in the processing directory");
    }

    match watch_result {
        Ok(()) => {
            info!("Ingestion daemon stopped");
            Ok(())
        },
        Err(err) => {
            error!(error = %err, "Watcher failed");
            Err(err).context("Inbox watch lost")
        },
    }
}
