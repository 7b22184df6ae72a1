//! In-process sink for dry runs and tests

use super::{Sink, SinkError, SinkRecord, SinkTransaction, TableSpec};
use crate::dataset::Row;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub records: Vec<SinkRecord>,
}

/// Tables held in memory; committed rows are visible to every clone
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: Arc<Mutex<HashMap<String, MemoryTable>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.lock().get(name).cloned()
    }

    /// Committed rows in `name`, 0 for an unknown table
    pub fn row_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, |t| t.records.len())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

fn column_names(spec: &TableSpec) -> Vec<String> {
    spec.columns().iter().map(|c| c.raw().to_string()).collect()
}

fn check_columns(table: &str, existing: &[String], incoming: &[String]) -> Result<(), SinkError> {
    if existing == incoming {
        Ok(())
    } else {
        Err(SinkError::Permanent(format!(
            "table '{}' has columns [{}], load has [{}]",
            table,
            existing.join(", "),
            incoming.join(", ")
        )))
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self, spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        let table = spec.table().raw().to_string();
        let columns = column_names(spec);

        if let Some(existing) = self.lock().get(&table) {
            check_columns(&table, &existing.columns, &columns)?;
        }

        Ok(Box::new(MemoryTransaction {
            sink: self.clone(),
            table,
            columns,
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    sink: MemorySink,
    table: String,
    columns: Vec<String>,
    staged: Vec<SinkRecord>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn insert(&mut self, rows: &[Row]) -> Result<u64, SinkError> {
        let processed_at = Utc::now();
        for row in rows {
            if row.values.len() != self.columns.len() {
                return Err(SinkError::Permanent(format!(
                    "line {} has {} values for {} columns",
                    row.line,
                    row.values.len(),
                    self.columns.len()
                )));
            }
            self.staged.push(SinkRecord {
                values: row.values.clone(),
                processed_at,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let MemoryTransaction {
            sink,
            table,
            columns,
            staged,
        } = *self;

        let mut tables = sink.lock();
        let entry = tables.entry(table.clone()).or_insert_with(|| MemoryTable {
            columns: columns.clone(),
            records: Vec::new(),
        });
        check_columns(&table, &entry.columns, &columns)?;
        entry.records.extend(staged);
        Ok(())
    }
}
