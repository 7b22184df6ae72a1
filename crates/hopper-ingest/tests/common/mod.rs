//! Shared helpers for the Hopper integration tests
//!
//! - [`TestLayout`]: the four working directories under a temp root
//! - Sinks with scripted behaviour ([`FlakySink`], [`SlowSink`], [`PanickingSink`])
//! - [`MemoryOutcomeLog`]: an outcome log that keeps every record
//! - [`TestPostgres`]: a throwaway PostgreSQL container (needs Docker)

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use hopper_ingest::config::{DirectoryLayout, IngestConfig, OutcomeLogKind, SinkKind};
use hopper_ingest::daemon;
use hopper_ingest::dataset::Row;
use hopper_ingest::outcome::{OutcomeLog, OutcomeLogError, ProcessingOutcome};
use hopper_ingest::pipeline::Pipeline;
use hopper_ingest::retry::RetryPolicy;
use hopper_ingest::sink::{MemorySink, Sink, SinkError, SinkTransaction, TableSpec};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

/// Initialize tracing for tests; safe to call more than once
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,hopper_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Directories
// ============================================================================

pub struct TestLayout {
    root: TempDir,
    pub layout: DirectoryLayout,
}

impl TestLayout {
    /// Create the four directories under a fresh temp root
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let layout = DirectoryLayout::under(root.path());
        for dir in [&layout.inbox, &layout.processing, &layout.done, &layout.error] {
            std::fs::create_dir_all(dir).expect("Failed to create directory");
        }
        Self { root, layout }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Drop a file into the inbox
    pub fn drop_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.layout.inbox.join(name);
        std::fs::write(&path, content).expect("Failed to write inbox file");
        path
    }

    pub fn inbox(&self) -> Vec<String> {
        list(&self.layout.inbox)
    }

    pub fn processing(&self) -> Vec<String> {
        list(&self.layout.processing)
    }

    pub fn done(&self) -> Vec<String> {
        list(&self.layout.done)
    }

    pub fn error(&self) -> Vec<String> {
        list(&self.layout.error)
    }

    /// Config with fast retries, quick polling, the memory sink and a file log
    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            layout: self.layout.clone(),
            poll_interval: Duration::from_millis(20),
            settle: false,
            shutdown_timeout: Duration::from_secs(10),
            sink: SinkKind::Memory,
            outcome_log: OutcomeLogKind::File,
            outcome_log_path: self.root().join("outcomes.jsonl"),
            db_retry: fast_retry(3),
            fs_retry: fast_retry(3),
            ..IngestConfig::default()
        }
    }
}

/// Sorted file names directly inside `dir`
pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(5))
}

/// Pipeline over the given sink, recording outcomes in memory
pub fn pipeline(
    config: &IngestConfig,
    sink: Arc<dyn Sink>,
) -> (Arc<Pipeline>, Arc<MemoryOutcomeLog>) {
    let outcomes = Arc::new(MemoryOutcomeLog::default());
    let pipeline = daemon::build(config, sink, outcomes.clone()).expect("Failed to build pipeline");
    (pipeline, outcomes)
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Outcome log
// ============================================================================

#[derive(Default)]
pub struct MemoryOutcomeLog {
    records: Mutex<Vec<ProcessingOutcome>>,
}

impl MemoryOutcomeLog {
    pub fn all(&self) -> Vec<ProcessingOutcome> {
        self.records.lock().expect("outcome log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("outcome log poisoned").len()
    }
}

#[async_trait]
impl OutcomeLog for MemoryOutcomeLog {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn record(&self, outcome: &ProcessingOutcome) -> Result<(), OutcomeLogError> {
        self.records
            .lock()
            .expect("outcome log poisoned")
            .push(outcome.clone());
        Ok(())
    }

    async fn lookup(&self, file_name: &str) -> Result<Option<ProcessingOutcome>, OutcomeLogError> {
        Ok(self
            .records
            .lock()
            .expect("outcome log poisoned")
            .iter()
            .rev()
            .find(|o| o.file_name == file_name)
            .cloned())
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Fails the first `failures` transactions with a transient error
pub struct FlakySink {
    pub inner: MemorySink,
    failures_left: AtomicU32,
    pub begins: AtomicU32,
}

impl FlakySink {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemorySink::new(),
            failures_left: AtomicU32::new(failures),
            begins: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Sink for FlakySink {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn begin(&self, spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SinkError::Transient("connection reset".to_string()));
        }
        self.inner.begin(spec).await
    }
}

/// Holds every transaction open for `delay` and tracks overlap
pub struct SlowSink {
    pub inner: MemorySink,
    delay: Duration,
    active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemorySink::new(),
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for SlowSink {
    fn kind(&self) -> &'static str {
        "slow"
    }

    async fn begin(&self, spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let inner = self.inner.begin(spec).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        inner
    }
}

/// Panics inside the load stage
pub struct PanickingSink;

#[async_trait]
impl Sink for PanickingSink {
    fn kind(&self) -> &'static str {
        "panicking"
    }

    async fn begin(&self, _spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        panic!("sink exploded");
    }
}

/// Accepts rows but fails every commit permanently
pub struct RejectingSink;

struct RejectingTransaction;

#[async_trait]
impl Sink for RejectingSink {
    fn kind(&self) -> &'static str {
        "rejecting"
    }

    async fn begin(&self, _spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        Ok(Box::new(RejectingTransaction))
    }
}

#[async_trait]
impl SinkTransaction for RejectingTransaction {
    async fn insert(&mut self, rows: &[Row]) -> Result<u64, SinkError> {
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        Err(SinkError::Permanent("value too long for type".to_string()))
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    /// Start a PostgreSQL 16 container and connect a pool to it
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Whether a Docker daemon is reachable
pub fn is_docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
