//! Per-file outcomes and the durable outcome log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Done,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OutcomeStatus::Done => "done",
            OutcomeStatus::Error => "error",
        }
    }
}

impl From<String> for OutcomeStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "done" => OutcomeStatus::Done,
            _ => OutcomeStatus::Error,
        }
    }
}

/// Why a file ended in the error directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// A blocking validation check failed
    ValidationFailure(String),
    /// The sink kept failing transiently until the retry budget ran out
    TransientStorageError(String),
    /// Moving the file kept failing transiently until the retry budget ran out
    TransientIoError(String),
    /// Anything else: permanent sink errors, I/O errors, panics
    UnexpectedFault(String),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::ValidationFailure(_) => "validation_failure",
            FailureReason::TransientStorageError(_) => "transient_storage_error",
            FailureReason::TransientIoError(_) => "transient_io_error",
            FailureReason::UnexpectedFault(_) => "unexpected_fault",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            FailureReason::ValidationFailure(detail)
            | FailureReason::TransientStorageError(detail)
            | FailureReason::TransientIoError(detail)
            | FailureReason::UnexpectedFault(detail) => detail,
        }
    }

    /// Rebuild a reason from its kind and detail; unknown kinds are faults
    pub fn from_parts(kind: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            "validation_failure" => FailureReason::ValidationFailure(detail),
            "transient_storage_error" => FailureReason::TransientStorageError(detail),
            "transient_io_error" => FailureReason::TransientIoError(detail),
            _ => FailureReason::UnexpectedFault(detail),
        }
    }

    /// Parse the `kind: detail` form written by `Display`
    pub fn parse(text: &str) -> Self {
        match text.split_once(": ") {
            Some((kind, detail)) => Self::from_parts(kind, detail),
            None => Self::from_parts(text, ""),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.detail())
    }
}

/// What the pipeline decided for a claimed file, before routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Done { table: String, rows: u64 },
    Error(FailureReason),
}

/// The terminal record of one claimed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub trace_id: Uuid,
    pub file_name: String,
    pub status: OutcomeStatus,
    /// Final location in the done or error directory
    pub destination: PathBuf,
    pub reason: Option<FailureReason>,
    pub rows_loaded: u64,
    /// SHA-256 of the file content, when it could be read
    pub checksum: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingOutcome {
    pub fn is_done(&self) -> bool {
        self.status == OutcomeStatus::Done
    }
}

#[derive(Error, Debug)]
pub enum OutcomeLogError {
    #[error("outcome log database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outcome log file error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutcomeLogError {
    pub fn is_transient(&self) -> bool {
        match self {
            OutcomeLogError::Database(err) => crate::db::is_transient(err),
            OutcomeLogError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
        }
    }
}

/// Durable, queryable record of every terminal outcome
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    /// Short name for logs ("postgres", "file")
    fn kind(&self) -> &'static str;

    async fn record(&self, outcome: &ProcessingOutcome) -> Result<(), OutcomeLogError>;

    /// Most recent outcome recorded for `file_name`
    async fn lookup(&self, file_name: &str) -> Result<Option<ProcessingOutcome>, OutcomeLogError>;
}

// ============================================================================
// Postgres
// ============================================================================

const CREATE_OUTCOME_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ingested_files (
    id BIGSERIAL PRIMARY KEY,
    trace_id UUID NOT NULL,
    file_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    rows_loaded BIGINT NOT NULL DEFAULT 0,
    checksum TEXT,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const CREATE_OUTCOME_INDEX: &str = "CREATE INDEX IF NOT EXISTS ingested_files_file_name_idx \
     ON ingested_files (file_name, processed_at DESC)";

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    trace_id: Uuid,
    file_name: String,
    file_path: String,
    status: String,
    reason: Option<String>,
    rows_loaded: i64,
    checksum: Option<String>,
    processed_at: DateTime<Utc>,
}

impl From<OutcomeRow> for ProcessingOutcome {
    fn from(row: OutcomeRow) -> Self {
        Self {
            trace_id: row.trace_id,
            file_name: row.file_name,
            status: OutcomeStatus::from(row.status),
            destination: PathBuf::from(row.file_path),
            reason: row.reason.as_deref().map(FailureReason::parse),
            rows_loaded: u64::try_from(row.rows_loaded).unwrap_or(0),
            checksum: row.checksum,
            finished_at: row.processed_at,
        }
    }
}

/// Outcome log in the `ingested_files` table
#[derive(Clone)]
pub struct PgOutcomeLog {
    pool: PgPool,
}

impl PgOutcomeLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), OutcomeLogError> {
        sqlx::query(CREATE_OUTCOME_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_OUTCOME_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeLog for PgOutcomeLog {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn record(&self, outcome: &ProcessingOutcome) -> Result<(), OutcomeLogError> {
        sqlx::query(
            r#"
            INSERT INTO ingested_files
                (trace_id, file_name, file_path, status, reason, rows_loaded, checksum, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(outcome.trace_id)
        .bind(&outcome.file_name)
        .bind(outcome.destination.to_string_lossy().into_owned())
        .bind(outcome.status.as_str())
        .bind(outcome.reason.as_ref().map(ToString::to_string))
        .bind(i64::try_from(outcome.rows_loaded).unwrap_or(i64::MAX))
        .bind(&outcome.checksum)
        .bind(outcome.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lookup(&self, file_name: &str) -> Result<Option<ProcessingOutcome>, OutcomeLogError> {
        let row = sqlx::query_as::<_, OutcomeRow>(
            r#"
            SELECT trace_id, file_name, file_path, status, reason, rows_loaded, checksum, processed_at
            FROM ingested_files
            WHERE file_name = $1
            ORDER BY processed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProcessingOutcome::from))
    }
}

// ============================================================================
// JSON lines
// ============================================================================

/// Outcome log appended to a JSON-lines file
pub struct JsonlOutcomeLog {
    path: PathBuf,
    // Appends from concurrent workers must not interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlOutcomeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn join_error(err: tokio::task::JoinError) -> std::io::Error {
    std::io::Error::other(format!("outcome log task failed: {}", err))
}

#[async_trait]
impl OutcomeLog for JsonlOutcomeLog {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn record(&self, outcome: &ProcessingOutcome) -> Result<(), OutcomeLogError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let outcome = outcome.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            serde_jsonlines::append_json_lines(&path, [outcome])
        })
        .await
        .map_err(join_error)??;

        Ok(())
    }

    async fn lookup(&self, file_name: &str) -> Result<Option<ProcessingOutcome>, OutcomeLogError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let file_name = file_name.to_string();

        let found = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
            let lines = match serde_jsonlines::json_lines::<ProcessingOutcome, _>(&path) {
                Ok(lines) => lines,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err),
            };

            let mut latest = None;
            for (index, outcome) in lines.enumerate() {
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(err)
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                        ) =>
                    {
                        warn!(
                            path = %path.display(),
                            line = index + 1,
                            error = %err,
                            "Skipping unreadable outcome record"
                        );
                        continue;
                    },
                    Err(err) => return Err(err),
                };
                if outcome.file_name == file_name {
                    latest = Some(outcome);
                }
            }
            Ok(latest)
        })
        .await
        .map_err(join_error)??;

        Ok(found)
    }
}
