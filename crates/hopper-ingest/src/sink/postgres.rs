use super::{Sink, SinkError, SinkTransaction, TableSpec};
use crate::dataset::Row;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

/// Sink writing into Postgres through a shared pool
#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Two loads racing on `CREATE TABLE IF NOT EXISTS` for the same new table
/// can trip the catalog's unique index; the loser succeeds on retry.
fn create_error(err: sqlx::Error) -> SinkError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(db.code().as_deref(), Some("23505") | Some("42P07")) {
            return SinkError::Transient(format!("concurrent table creation: {}", db.message()));
        }
    }
    SinkError::from(err)
}

#[async_trait]
impl Sink for PgSink {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self, spec: &TableSpec) -> Result<Box<dyn SinkTransaction>, SinkError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&spec.create_table_sql())
            .execute(&mut *tx)
            .await
            .map_err(create_error)?;

        debug!(table = %spec.table().raw(), "Sink table ready");

        Ok(Box::new(PgTransaction {
            tx,
            insert_prefix: spec.insert_prefix(),
            rows_per_statement: spec.rows_per_statement(),
        }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    insert_prefix: String,
    rows_per_statement: usize,
}

#[async_trait]
impl SinkTransaction for PgTransaction {
    async fn insert(&mut self, rows: &[Row]) -> Result<u64, SinkError> {
        let mut inserted = 0;

        for batch in rows.chunks(self.rows_per_statement) {
            let mut builder = QueryBuilder::<Postgres>::new(&self.insert_prefix);
            builder.push_values(batch, |mut values, row| {
                for value in &row.values {
                    values.push_bind(value.clone());
                }
            });

            let result = builder.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        self.tx.commit().await?;
        Ok(())
    }
}
