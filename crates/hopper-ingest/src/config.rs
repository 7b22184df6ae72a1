//! Configuration management
//!
//! Everything is read once at startup from the environment (after loading a
//! `.env` file, if present) and passed down explicitly.

use crate::db::DatabaseConfig;
use crate::dispatcher::DispatchConfig;
use crate::loader::TableStrategy;
use crate::retry::{Backoff, RetryPolicy};
use crate::validator::{FormatRule, ValidationConfig, DEFAULT_EMAIL_PATTERN};
use crate::watcher::WatchConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Defaults
// ============================================================================

/// Default watched directory.
pub const DEFAULT_INBOX_DIR: &str = "data";

/// Default directory holding claimed files.
pub const DEFAULT_PROCESSING_DIR: &str = "processing";

/// Default directory for successfully loaded files.
pub const DEFAULT_DONE_DIR: &str = "done";

/// Default directory for rejected files.
pub const DEFAULT_ERROR_DIR: &str = "error";

/// Default number of files processed concurrently.
pub const DEFAULT_WORKERS: usize = 3;

/// Default number of detected files waiting for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default inbox scan interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default time allowed for in-flight files on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default target table.
pub const DEFAULT_TABLE: &str = "csv_data";

/// Default outcome log file when the file log is selected.
pub const DEFAULT_OUTCOME_LOG_PATH: &str = "outcomes.jsonl";

/// Default sink/outcome-log retry budget.
pub const DEFAULT_DB_RETRIES: u32 = 5;
pub const DEFAULT_DB_RETRY_DELAY_MS: u64 = 5000;

/// Default file-move retry budget.
pub const DEFAULT_FS_RETRIES: u32 = 3;
pub const DEFAULT_FS_RETRY_DELAY_MS: u64 = 10_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Constraint(String),
}

/// Where rows go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Postgres,
    /// In-process dry run; nothing is persisted
    Memory,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SinkKind::Postgres),
            "memory" | "dry-run" => Ok(SinkKind::Memory),
            other => Err(format!("unknown sink '{}'", other)),
        }
    }
}

/// Where outcomes are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeLogKind {
    Postgres,
    File,
}

impl FromStr for OutcomeLogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(OutcomeLogKind::Postgres),
            "file" | "jsonl" => Ok(OutcomeLogKind::File),
            other => Err(format!("unknown outcome log '{}'", other)),
        }
    }
}

/// The four directories a file moves through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub inbox: PathBuf,
    pub processing: PathBuf,
    pub done: PathBuf,
    pub error: PathBuf,
}

impl DirectoryLayout {
    /// All four directories under one root
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            inbox: root.join(DEFAULT_INBOX_DIR),
            processing: root.join(DEFAULT_PROCESSING_DIR),
            done: root.join(DEFAULT_DONE_DIR),
            error: root.join(DEFAULT_ERROR_DIR),
        }
    }

    /// Create any missing directory
    pub async fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.inbox, &self.processing, &self.done, &self.error] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

impl Default for DirectoryLayout {
    fn default() -> Self {
        Self::under("")
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub layout: DirectoryLayout,
    pub dispatch: DispatchConfig,
    pub poll_interval: Duration,
    pub settle: bool,
    pub process_existing: bool,
    pub shutdown_timeout: Duration,
    pub validation: ValidationConfig,
    pub sink: SinkKind,
    pub outcome_log: OutcomeLogKind,
    pub outcome_log_path: PathBuf,
    pub table: TableStrategy,
    pub database: DatabaseConfig,
    pub db_retry: RetryPolicy,
    pub fs_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            layout: DirectoryLayout::default(),
            dispatch: DispatchConfig {
                workers: DEFAULT_WORKERS,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            settle: true,
            process_existing: true,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            validation: ValidationConfig::default(),
            sink: SinkKind::Postgres,
            outcome_log: OutcomeLogKind::Postgres,
            outcome_log_path: PathBuf::from(DEFAULT_OUTCOME_LOG_PATH),
            table: TableStrategy::Fixed(DEFAULT_TABLE.to_string()),
            database: DatabaseConfig::default(),
            db_retry: RetryPolicy::new(
                DEFAULT_DB_RETRIES,
                Duration::from_millis(DEFAULT_DB_RETRY_DELAY_MS),
            ),
            fs_retry: RetryPolicy::new(
                DEFAULT_FS_RETRIES,
                Duration::from_millis(DEFAULT_FS_RETRY_DELAY_MS),
            ),
        }
    }
}

/// Typed access to a key/value source
struct Vars<F> {
    get: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.get)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: value.clone(),
                reason: err.to_string(),
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.raw(key).unwrap_or_else(|| default.to_string()))
    }

    fn retry(&self, prefix: &str, attempts: u32, delay_ms: u64) -> Result<RetryPolicy, ConfigError> {
        let attempts = self.parse(&format!("{}_RETRIES", prefix), attempts)?;
        let delay_ms = self.parse(&format!("{}_RETRY_DELAY_MS", prefix), delay_ms)?;
        let backoff = self.parse(&format!("{}_BACKOFF", prefix), Backoff::Fixed)?;
        Ok(RetryPolicy::new(attempts, Duration::from_millis(delay_ms)).with_backoff(backoff))
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset or blank keys take defaults
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { get };
        let defaults = Self::default();

        let delimiter = match vars.raw("HOPPER_EXPECTED_DELIMITER") {
            None => defaults.validation.expected_delimiter,
            Some(value) => parse_delimiter(&value)?,
        };

        let format = if vars.flag("HOPPER_FORMAT_CHECK", true)? {
            Some(FormatRule {
                column: vars.raw("HOPPER_FORMAT_COLUMN").unwrap_or_else(|| "email".to_string()),
                pattern: vars
                    .raw("HOPPER_FORMAT_PATTERN")
                    .unwrap_or_else(|| DEFAULT_EMAIL_PATTERN.to_string()),
            })
        } else {
            None
        };

        let mandatory_columns = vars
            .raw("HOPPER_MANDATORY_COLUMNS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let table = if vars.flag("HOPPER_TABLE_PER_FILE", false)? {
            TableStrategy::PerFile
        } else {
            TableStrategy::Fixed(vars.raw("HOPPER_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()))
        };

        let config = Self {
            layout: DirectoryLayout {
                inbox: vars.path("HOPPER_INBOX_DIR", DEFAULT_INBOX_DIR),
                processing: vars.path("HOPPER_PROCESSING_DIR", DEFAULT_PROCESSING_DIR),
                done: vars.path("HOPPER_DONE_DIR", DEFAULT_DONE_DIR),
                error: vars.path("HOPPER_ERROR_DIR", DEFAULT_ERROR_DIR),
            },
            dispatch: DispatchConfig {
                workers: vars.parse("HOPPER_WORKERS", DEFAULT_WORKERS)?,
                queue_capacity: vars.parse("HOPPER_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            },
            poll_interval: Duration::from_millis(
                vars.parse("HOPPER_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            ),
            settle: vars.flag("HOPPER_SETTLE", true)?,
            process_existing: vars.flag("HOPPER_PROCESS_EXISTING", true)?,
            shutdown_timeout: Duration::from_secs(
                vars.parse("HOPPER_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            ),
            validation: ValidationConfig {
                expected_delimiter: delimiter,
                mandatory_columns,
                missing_threshold: vars
                    .parse("HOPPER_MISSING_THRESHOLD", defaults.validation.missing_threshold)?,
                numeric_majority: vars
                    .parse("HOPPER_NUMERIC_MAJORITY", defaults.validation.numeric_majority)?,
                format,
                chunk_size: vars.parse("HOPPER_CHUNK_SIZE", defaults.validation.chunk_size)?,
                sniff_bytes: vars.parse("HOPPER_SNIFF_BYTES", defaults.validation.sniff_bytes)?,
            },
            sink: vars.parse("HOPPER_SINK", SinkKind::Postgres)?,
            outcome_log: vars.parse("HOPPER_OUTCOME_LOG", OutcomeLogKind::Postgres)?,
            outcome_log_path: vars.path("HOPPER_OUTCOME_LOG_PATH", DEFAULT_OUTCOME_LOG_PATH),
            table,
            database: DatabaseConfig {
                url: vars
                    .raw("DATABASE_URL")
                    .unwrap_or_else(|| defaults.database.url.clone()),
                max_connections: vars
                    .parse("DATABASE_MAX_CONNECTIONS", defaults.database.max_connections)?,
                min_connections: vars
                    .parse("DATABASE_MIN_CONNECTIONS", defaults.database.min_connections)?,
                connect_timeout_secs: vars
                    .parse("DATABASE_CONNECT_TIMEOUT", defaults.database.connect_timeout_secs)?,
            },
            db_retry: vars.retry("HOPPER_DB", DEFAULT_DB_RETRIES, DEFAULT_DB_RETRY_DELAY_MS)?,
            fs_retry: vars.retry("HOPPER_FS", DEFAULT_FS_RETRIES, DEFAULT_FS_RETRY_DELAY_MS)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| Err(ConfigError::Constraint(message.to_string()));

        if self.dispatch.workers == 0 {
            return fail("HOPPER_WORKERS must be greater than 0");
        }
        if self.dispatch.queue_capacity == 0 {
            return fail("HOPPER_QUEUE_CAPACITY must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            return fail("HOPPER_POLL_INTERVAL_MS must be greater than 0");
        }
        if self.validation.chunk_size == 0 {
            return fail("HOPPER_CHUNK_SIZE must be greater than 0");
        }
        if self.validation.sniff_bytes == 0 {
            return fail("HOPPER_SNIFF_BYTES must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.validation.missing_threshold) {
            return fail("HOPPER_MISSING_THRESHOLD must be between 0 and 1");
        }
        if !(0.0..1.0).contains(&self.validation.numeric_majority) {
            return fail("HOPPER_NUMERIC_MAJORITY must be at least 0 and below 1");
        }
        if let Some(format) = &self.validation.format {
            if let Err(err) = regex::Regex::new(&format.pattern) {
                return Err(ConfigError::Invalid {
                    key: "HOPPER_FORMAT_PATTERN".to_string(),
                    value: format.pattern.clone(),
                    reason: err.to_string(),
                });
            }
        }
        if self.db_retry.max_attempts == 0 || self.fs_retry.max_attempts == 0 {
            return fail("retry counts must be at least 1");
        }
        if self.database.max_connections == 0 {
            return fail("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.database.min_connections > self.database.max_connections {
            return fail("DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS");
        }

        let dirs = [
            &self.layout.inbox,
            &self.layout.processing,
            &self.layout.done,
            &self.layout.error,
        ];
        for (i, a) in dirs.iter().enumerate() {
            if dirs[i + 1..].contains(a) {
                return Err(ConfigError::Constraint(format!(
                    "directory '{}' is used for more than one role",
                    a.display()
                )));
            }
        }

        Ok(())
    }

    /// Whether anything needs a database connection
    pub fn needs_database(&self) -> bool {
        self.sink == SinkKind::Postgres || self.outcome_log == OutcomeLogKind::Postgres
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            inbox: self.layout.inbox.clone(),
            poll_interval: self.poll_interval,
            settle: self.settle,
            process_existing: self.process_existing,
        }
    }
}

/// A single-byte delimiter; `\t` and `tab` name the tab character
fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "HOPPER_EXPECTED_DELIMITER".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    match value {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        _ => match value.as_bytes() {
            [byte] if byte.is_ascii() && !byte.is_ascii_alphanumeric() && *byte != b'"' => Ok(*byte),
            [_] => Err(invalid("delimiter must be ASCII punctuation or whitespace")),
            _ => Err(invalid("delimiter must be a single character")),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.layout.inbox, PathBuf::from("data"));
        assert_eq!(config.layout.processing, PathBuf::from("processing"));
        assert_eq!(config.dispatch.workers, 3);
        assert_eq!(config.dispatch.queue_capacity, 64);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.settle);
        assert_eq!(config.validation.expected_delimiter, b',');
        assert_eq!(config.validation.missing_threshold, 0.3);
        assert_eq!(config.validation.format, Some(FormatRule::default()));
        assert_eq!(config.table, TableStrategy::Fixed("csv_data".to_string()));
        assert_eq!(config.sink, SinkKind::Postgres);
        assert_eq!(config.db_retry.max_attempts, 5);
        assert_eq!(config.db_retry.delay, Duration::from_secs(5));
        assert_eq!(config.fs_retry.max_attempts, 3);
        assert_eq!(config.fs_retry.delay, Duration::from_secs(10));
        assert!(config.needs_database());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HOPPER_WORKERS", "8"),
            ("HOPPER_EXPECTED_DELIMITER", "\\t"),
            ("HOPPER_MANDATORY_COLUMNS", "id, email ,"),
            ("HOPPER_FORMAT_CHECK", "false"),
            ("HOPPER_SINK", "memory"),
            ("HOPPER_OUTCOME_LOG", "file"),
            ("HOPPER_TABLE_PER_FILE", "yes"),
            ("HOPPER_DB_BACKOFF", "exponential"),
            ("HOPPER_FS_RETRY_DELAY_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.dispatch.workers, 8);
        assert_eq!(config.validation.expected_delimiter, b'\t');
        assert_eq!(config.validation.mandatory_columns, ["id", "email"]);
        assert_eq!(config.validation.format, None);
        assert_eq!(config.table, TableStrategy::PerFile);
        assert_eq!(config.db_retry.backoff, Backoff::Exponential);
        assert_eq!(config.fs_retry.delay, Duration::from_millis(250));
        assert!(!config.needs_database());
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = from_pairs(&[("HOPPER_WORKERS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "HOPPER_WORKERS"));

        let err = from_pairs(&[("HOPPER_SETTLE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "HOPPER_SETTLE"));

        let err = from_pairs(&[("HOPPER_EXPECTED_DELIMITER", ";;")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_constraints() {
        assert!(matches!(
            from_pairs(&[("HOPPER_WORKERS", "0")]),
            Err(ConfigError::Constraint(_))
        ));
        assert!(matches!(
            from_pairs(&[("HOPPER_MISSING_THRESHOLD", "1.5")]),
            Err(ConfigError::Constraint(_))
        ));
        assert!(matches!(
            from_pairs(&[("HOPPER_DONE_DIR", "data")]),
            Err(ConfigError::Constraint(_))
        ));
        assert!(matches!(
            from_pairs(&[("HOPPER_FORMAT_PATTERN", "([")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        std::env::set_var("HOPPER_QUEUE_CAPACITY", "7");
        std::env::set_var("HOPPER_SINK", "memory");

        let config = IngestConfig::load();

        std::env::remove_var("HOPPER_QUEUE_CAPACITY");
        std::env::remove_var("HOPPER_SINK");

        let config = config.unwrap();
        assert_eq!(config.dispatch.queue_capacity, 7);
        assert_eq!(config.sink, SinkKind::Memory);
    }

    #[tokio::test]
    async fn test_layout_ensure_creates_directories() {
        let root = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::under(root.path());

        layout.ensure().await.unwrap();

        assert!(layout.inbox.is_dir());
        assert!(layout.processing.is_dir());
        assert!(layout.done.is_dir());
        assert!(layout.error.is_dir());
    }
}
