//! Hopper - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hopper_common::logging::{init_logging, LogConfig, LogLevel};
use hopper_ingest::config::{IngestConfig, OutcomeLogKind};
use hopper_ingest::daemon;
use hopper_ingest::db::create_pool;
use hopper_ingest::validator::Validator;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::info;

/// Exit code of `validate` for a file that fails validation
const EXIT_INVALID: u8 = 2;

/// Hopper - delimited file ingestion daemon
#[derive(Parser, Debug)]
#[command(name = "hopper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the inbox and ingest files until interrupted
    Run,

    /// Validate one file and print the report
    Validate {
        /// File to validate
        file: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show where a file ended up
    Lookup {
        /// Name the file arrived under
        file_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("hopper")
        .filter_directives("hopper_ingest=debug,sqlx=warn")
        .build();

    // Environment takes precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::load().context("Invalid configuration")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Validate { file, json } => validate(&config, file, json).await,
        Commands::Lookup { file_name } => lookup(&config, &file_name).await,
    }
}

async fn run(config: IngestConfig) -> Result<ExitCode> {
    info!(
        inbox = %config.layout.inbox.display(),
        workers = config.dispatch.workers,
        "Starting Hopper"
    );

    let pipeline = daemon::connect(&config).await?;
    daemon::serve(pipeline, &config, shutdown_signal()).await?;

    Ok(ExitCode::SUCCESS)
}

async fn validate(config: &IngestConfig, file: PathBuf, json: bool) -> Result<ExitCode> {
    let validator = Validator::new(config.validation.clone())?;
    let display = file.display().to_string();

    let (_, report) = tokio::task::spawn_blocking(move || validator.validate_path(&file))
        .await?
        .with_context(|| format!("Failed to read {}", display))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INVALID)
    })
}

async fn lookup(config: &IngestConfig, file_name: &str) -> Result<ExitCode> {
    let pool = match config.outcome_log {
        OutcomeLogKind::Postgres => Some(
            create_pool(&config.database)
                .await
                .context("Failed to connect to the database")?,
        ),
        OutcomeLogKind::File => None,
    };
    let outcomes = daemon::open_outcome_log(config, pool.as_ref()).await?;

    match outcomes.lookup(file_name).await? {
        Some(outcome) => {
            println!("{}", outcome.destination.display());
            println!("  status:   {}", outcome.status.as_str());
            if let Some(reason) = &outcome.reason {
                println!("  reason:   {}", reason);
            }
            println!("  rows:     {}", outcome.rows_loaded);
            println!("  trace id: {}", outcome.trace_id);
            println!("  finished: {}", outcome.finished_at.to_rfc3339());
            Ok(ExitCode::SUCCESS)
        },
        None => {
            eprintln!("No outcome recorded for {}", file_name);
            Ok(ExitCode::FAILURE)
        },
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
