//! Loads a validated file into the sink
//!
//! Each attempt re-reads the file from disk on the blocking pool and streams
//! chunks through a small channel into one sink transaction, so memory stays
//! bounded by the chunk size. Transient sink errors restart the whole attempt
//! under the retry policy; a partially written attempt is never committed.

use crate::dataset::{DatasetError, DatasetReader, Row, Schema};
use crate::retry::{RetryFailure, RetryPolicy};
use crate::sink::{table_name_from_stem, Sink, SinkError, TableSpec};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Chunks buffered between the file reader and the sink
const CHANNEL_DEPTH: usize = 2;

/// Which table a file is loaded into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStrategy {
    /// Every file goes into the same table
    Fixed(String),
    /// One table per file, named after the sanitised file stem
    PerFile,
}

impl TableStrategy {
    pub fn resolve(&self, path: &Path) -> Result<String, LoadError> {
        match self {
            TableStrategy::Fixed(name) => Ok(name.clone()),
            TableStrategy::PerFile => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                table_name_from_stem(&stem).ok_or(LoadError::TableName(stem))
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows: u64,
    /// Attempts used, 1 when the first one succeeded
    pub attempts: u32,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("sink still failing after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error("load rejected: {0}")]
    Rejected(SinkError),

    #[error("could not read file: {0}")]
    Read(#[from] DatasetError),

    #[error("no usable table name in file stem '{0}'")]
    TableName(String),
}

/// Why a single attempt failed
#[derive(Debug)]
enum AttemptError {
    Sink(SinkError),
    Read(DatasetError),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        matches!(self, AttemptError::Sink(err) if err.is_transient())
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Sink(err) => err.fmt(f),
            AttemptError::Read(err) => err.fmt(f),
        }
    }
}

impl From<SinkError> for AttemptError {
    fn from(err: SinkError) -> Self {
        AttemptError::Sink(err)
    }
}

impl From<DatasetError> for AttemptError {
    fn from(err: DatasetError) -> Self {
        AttemptError::Read(err)
    }
}

pub struct Loader {
    sink: Arc<dyn Sink>,
    retry: RetryPolicy,
    table: TableStrategy,
    chunk_size: usize,
}

impl Loader {
    pub fn new(
        sink: Arc<dyn Sink>,
        retry: RetryPolicy,
        table: TableStrategy,
        chunk_size: usize,
    ) -> Self {
        Self {
            sink,
            retry,
            table,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Load the data rows of `path` in a single committed transaction
    ///
    /// `expected_rows` is the row count the validator saw; a different count
    /// on re-read means the file changed underneath us and the load is
    /// rejected.
    pub async fn load(
        &self,
        path: &Path,
        schema: &Schema,
        delimiter: u8,
        expected_rows: u64,
    ) -> Result<LoadSummary, LoadError> {
        let table = self.table.resolve(path)?;
        let spec = TableSpec::new(&table, schema).map_err(LoadError::Rejected)?;
        let spec = &spec;

        let mut attempts = 0;
        let result = self
            .retry
            .run("load", AttemptError::is_transient, |attempt| {
                attempts = attempt;
                self.attempt(path, spec, delimiter, expected_rows)
            })
            .await;

        match result {
            Ok(rows) => {
                info!(
                    table = %table,
                    rows,
                    attempts,
                    sink = self.sink.kind(),
                    "Rows committed"
                );
                Ok(LoadSummary {
                    table,
                    rows,
                    attempts,
                })
            },
            Err(RetryFailure {
                attempts,
                exhausted: true,
                error: AttemptError::Sink(source),
            }) => Err(LoadError::Exhausted { attempts, source }),
            Err(RetryFailure {
                error: AttemptError::Sink(err),
                ..
            }) => Err(LoadError::Rejected(err)),
            Err(RetryFailure {
                error: AttemptError::Read(err),
                ..
            }) => Err(LoadError::Read(err)),
        }
    }

    async fn attempt(
        &self,
        path: &Path,
        spec: &TableSpec,
        delimiter: u8,
        expected_rows: u64,
    ) -> Result<u64, AttemptError> {
        let (sender, mut receiver) = mpsc::channel(CHANNEL_DEPTH);
        let reader = spawn_chunk_reader(path, delimiter, self.chunk_size, sender);

        let mut transaction = self.sink.begin(spec).await?;
        let mut rows = 0;

        while let Some(chunk) = receiver.recv().await {
            let chunk = chunk?;
            rows += transaction.insert(&chunk).await?;
            debug!(table = %spec.table().raw(), rows, "Chunk inserted");
        }

        if let Err(err) = reader.await {
            return Err(AttemptError::Read(DatasetError::Io(std::io::Error::other(format!(
                "chunk reader stopped: {}",
                err
            )))));
        }

        if rows != expected_rows {
            return Err(AttemptError::Sink(SinkError::Permanent(format!(
                "wrote {} rows but validation counted {}",
                rows, expected_rows
            ))));
        }

        transaction.commit().await?;
        Ok(rows)
    }
}

/// Read `path` on the blocking pool, sending data rows in chunks
///
/// Stops quietly when the receiver goes away.
fn spawn_chunk_reader(
    path: &Path,
    delimiter: u8,
    chunk_size: usize,
    sender: mpsc::Sender<Result<Vec<Row>, DatasetError>>,
) -> tokio::task::JoinHandle<()> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                let _ = sender.blocking_send(Err(err.into()));
                return;
            },
        };

        let mut records = DatasetReader::new(BufReader::new(file), delimiter);
        if let Err(err) = records.read_header() {
            let _ = sender.blocking_send(Err(err));
            return;
        }

        loop {
            match records.next_chunk(chunk_size) {
                Ok(chunk) if chunk.is_empty() => return,
                Ok(chunk) => {
                    if sender.blocking_send(Ok(chunk)).is_err() {
                        return;
                    }
                },
                Err(err) => {
                    let _ = sender.blocking_send(Err(err));
                    return;
                },
            }
        }
    })
}
