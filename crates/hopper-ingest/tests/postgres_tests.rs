//! PostgreSQL sink and outcome log against a real server
//!
//! These need Docker; run with `cargo test -- --ignored`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{init_test_tracing, is_docker_available, TestLayout, TestPostgres};
use hopper_ingest::daemon;
use hopper_ingest::dataset::{Row, Schema};
use hopper_ingest::outcome::{OutcomeLog, OutcomeStatus, PgOutcomeLog};
use hopper_ingest::sink::{PgSink, Sink, SinkError, TableSpec};
use std::sync::Arc;

async fn start() -> Option<TestPostgres> {
    init_test_tracing();
    if !is_docker_available() {
        eprintln!("Docker not available, skipping");
        return None;
    }
    Some(TestPostgres::start().await.expect("Failed to start PostgreSQL"))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pipeline_loads_into_postgres() {
    let Some(pg) = start().await else { return };
    let dirs = TestLayout::new();

    let outcomes = PgOutcomeLog::new(pg.pool().clone());
    outcomes.ensure_schema().await.unwrap();
    let outcomes = Arc::new(outcomes);

    let pipeline = daemon::build(
        &dirs.config(),
        Arc::new(PgSink::new(pg.pool().clone())),
        outcomes.clone(),
    )
    .unwrap();

    let path = dirs.drop_file(
        "people.csv",
        "id,email,\"Full Name\"\n1,a@b.com,Ann Lee\n2,c@d.org,\n",
    );
    let outcome = pipeline.process(path).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Done, "{:?}", outcome.reason);
    assert_eq!(outcome.rows_loaded, 2);

    let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
        r#"SELECT id, email, "Full Name" FROM csv_data WHERE processed_at IS NOT NULL ORDER BY id"#,
    )
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(
        rows,
        vec![
            ("1".to_string(), "a@b.com".to_string(), Some("Ann Lee".to_string())),
            ("2".to_string(), "c@d.org".to_string(), None),
        ]
    );

    let recorded = outcomes.lookup("people.csv").await.unwrap().unwrap();
    assert_eq!(recorded.trace_id, outcome.trace_id);
    assert_eq!(recorded.status, OutcomeStatus::Done);
    assert_eq!(recorded.rows_loaded, 2);
    assert_eq!(recorded.destination, outcome.destination);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_uncommitted_transaction_leaves_no_rows() {
    let Some(pg) = start().await else { return };
    let sink = PgSink::new(pg.pool().clone());
    let spec = TableSpec::new("partial", &Schema::new(["a", "b"]).unwrap()).unwrap();

    let mut tx = sink.begin(&spec).await.unwrap();
    tx.insert(&[Row::from_raw(2, ["1", "x"])]).await.unwrap();
    drop(tx);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM partial")
        .fetch_one(pg.pool())
        .await
        .unwrap_or(0);
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mismatched_row_is_permanent_error() {
    let Some(pg) = start().await else { return };
    let sink = PgSink::new(pg.pool().clone());
    let spec = TableSpec::new("strict", &Schema::new(["a", "b"]).unwrap()).unwrap();

    let mut tx = sink.begin(&spec).await.unwrap();
    let err = tx.insert(&[Row::from_raw(2, ["only one"])]).await.unwrap_err();

    assert!(matches!(err, SinkError::Permanent(_)), "{}", err);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_outcome_lookup_returns_most_recent() {
    let Some(pg) = start().await else { return };
    let dirs = TestLayout::new();
    let outcomes = PgOutcomeLog::new(pg.pool().clone());
    outcomes.ensure_schema().await.unwrap();
    let outcomes = Arc::new(outcomes);

    let pipeline = daemon::build(
        &dirs.config(),
        Arc::new(PgSink::new(pg.pool().clone())),
        outcomes.clone(),
    )
    .unwrap();

    pipeline.clone().process(dirs.drop_file("daily.csv", "")).await.unwrap();
    pipeline
        .process(dirs.drop_file("daily.csv", "id,name\n1,x\n"))
        .await
        .unwrap();

    let latest = outcomes.lookup("daily.csv").await.unwrap().unwrap();
    assert_eq!(latest.status, OutcomeStatus::Done);
    assert!(outcomes.lookup("unknown.csv").await.unwrap().is_none());
}
