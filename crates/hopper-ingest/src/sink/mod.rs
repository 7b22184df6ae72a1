//! Relational sinks for validated rows
//!
//! A [`Sink`] opens one [`SinkTransaction`] per load attempt. The transaction
//! creates the target table if needed, takes rows in chunks and becomes
//! visible only on [`SinkTransaction::commit`]. Dropping it uncommitted rolls
//! everything back.

pub mod ident;
pub mod memory;
pub mod postgres;

pub use ident::{table_name_from_stem, IdentError, QuotedIdent};
pub use memory::MemorySink;
pub use postgres::PgSink;

use crate::dataset::{Row, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Column added to every sink table, filled at insertion time
pub const TIMESTAMP_COLUMN: &str = "processed_at";

/// Postgres limit on bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("sink failure: {0}")]
    Permanent(String),

    #[error("invalid identifier: {0}")]
    Ident(#[from] IdentError),

    #[error("column '{0}' clashes with the ingestion timestamp column")]
    ReservedColumn(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::is_transient(&err) {
            SinkError::Transient(err.to_string())
        } else {
            SinkError::Permanent(err.to_string())
        }
    }
}

/// Target table and its quoted columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    table: QuotedIdent,
    columns: Vec<QuotedIdent>,
}

impl TableSpec {
    pub fn new(table: &str, schema: &Schema) -> Result<Self, SinkError> {
        let table = QuotedIdent::new(table)?;
        let columns = schema
            .columns()
            .iter()
            .map(|name| {
                if name.eq_ignore_ascii_case(TIMESTAMP_COLUMN) {
                    Err(SinkError::ReservedColumn(name.clone()))
                } else {
                    Ok(QuotedIdent::new(name.as_str())?)
                }
            })
            .collect::<Result<Vec<_>, SinkError>>()?;

        Ok(Self { table, columns })
    }

    pub fn table(&self) -> &QuotedIdent {
        &self.table
    }

    pub fn columns(&self) -> &[QuotedIdent] {
        &self.columns
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (", self.table);
        for column in &self.columns {
            sql.push_str(column.quoted());
            sql.push_str(" TEXT, ");
        }
        sql.push_str(TIMESTAMP_COLUMN);
        sql.push_str(" TIMESTAMPTZ NOT NULL DEFAULT now())");
        sql
    }

    /// `INSERT INTO t ("a", "b") ` ready for a `VALUES` list
    pub fn insert_prefix(&self) -> String {
        let columns: Vec<&str> = self.columns.iter().map(QuotedIdent::quoted).collect();
        format!("INSERT INTO {} ({}) ", self.table, columns.join(", "))
    }

    /// Rows per multi-row insert that stay under [`MAX_BIND_PARAMS`]
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }
}

/// One persisted row and the time it was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkRecord {
    pub values: Vec<Option<String>>,
    pub processed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name for logs ("postgres", "memory")
    fn kind(&self) -> &'static str;

    /// Start a transaction and make sure the target table exists
    async fn begin(&self, spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError>;
}

#[async_trait]
pub trait SinkTransaction: Send {
    /// Stage rows; returns how many were written
    async fn insert(&mut self, rows: &[Row]) -> Result<u64, SinkError>;

    async fn commit(self: Box<Self>) -> Result<(), SinkError>;
}
