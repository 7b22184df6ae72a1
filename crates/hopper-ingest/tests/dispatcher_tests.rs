//! Worker pool tests: concurrency bound, terminal states and shutdown

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{init_test_tracing, pipeline, wait_until, SlowSink, TestLayout};
use hopper_ingest::dispatcher::{DispatchConfig, DispatchError, Dispatcher};
use hopper_ingest::outcome::OutcomeStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const VALID: &str = "id,email\n1,a@b.com\n2,c@d.org\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_worker_count() {
    init_test_tracing();
    let dirs = TestLayout::new();
    let sink = Arc::new(SlowSink::new(Duration::from_millis(50)));
    let (pipeline, outcomes) = pipeline(&dirs.config(), sink.clone());

    let dispatcher = Dispatcher::start(
        pipeline,
        DispatchConfig {
            workers: 2,
            queue_capacity: 16,
        },
    );

    for i in 0..8 {
        let path = dirs.drop_file(&format!("file_{}.csv", i), VALID);
        dispatcher.submit(path).await.unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || outcomes.len() == 8).await);

    let stats = dispatcher.stats();
    assert!(stats.peak_in_flight <= 2, "peak was {}", stats.peak_in_flight);
    assert!(stats.peak_in_flight >= 1);
    assert!(sink.peak() <= 2, "sink saw {} concurrent loads", sink.peak());
    assert_eq!(sink.inner.row_count("csv_data"), 16);
    assert_eq!(dirs.done().len(), 8);

    assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_file_reaches_exactly_one_terminal_state() {
    let dirs = TestLayout::new();
    let (pipeline, outcomes) = pipeline(
        &dirs.config(),
        Arc::new(SlowSink::new(Duration::from_millis(5))),
    );
    let dispatcher = Dispatcher::start(
        pipeline,
        DispatchConfig {
            workers: 3,
            queue_capacity: 4,
        },
    );
    let mut events = dispatcher.subscribe();

    let mut expected = HashSet::new();
    for i in 0..12 {
        let (name, content) = if i % 3 == 0 {
            (format!("bad_{}.csv", i), "id,amount\n1,10\n2,x1\n3,30\n")
        } else {
            (format!("good_{}.csv", i), VALID)
        };
        expected.insert(name.clone());
        dispatcher.submit(dirs.drop_file(&name, content)).await.unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..12 {
        let outcome = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for outcome")
            .unwrap();
        let expected_status = if outcome.file_name.starts_with("bad_") {
            OutcomeStatus::Error
        } else {
            OutcomeStatus::Done
        };
        assert_eq!(outcome.status, expected_status, "{}", outcome.file_name);
        assert!(seen.insert(outcome.file_name), "outcome produced twice");
    }
    assert_eq!(seen, expected);

    assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(dirs.done().len(), 8);
    assert_eq!(dirs.error().len(), 4);
    assert!(dirs.inbox().is_empty());
    assert!(dirs.processing().is_empty());
    assert_eq!(outcomes.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_in_flight_and_leaves_queue_in_inbox() {
    let dirs = TestLayout::new();
    let (pipeline, outcomes) = pipeline(
        &dirs.config(),
        Arc::new(SlowSink::new(Duration::from_millis(300))),
    );
    let dispatcher = Dispatcher::start(
        pipeline,
        DispatchConfig {
            workers: 1,
            queue_capacity: 8,
        },
    );
    let submitter = dispatcher.submitter();

    for name in ["a.csv", "b.csv", "c.csv"] {
        submitter.submit(dirs.drop_file(name, VALID)).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || dispatcher.stats().in_flight == 1).await);

    assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

    assert_eq!(outcomes.len(), 1);
    assert_eq!(dirs.done().len(), 1);
    assert_eq!(dirs.inbox().len(), 2);
    assert!(dirs.processing().is_empty());

    assert_eq!(
        submitter.submit(dirs.layout.inbox.join("late.csv")).await,
        Err(DispatchError::Closed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_timeout_abandons_slow_files() {
    let dirs = TestLayout::new();
    let (pipeline, outcomes) = pipeline(
        &dirs.config(),
        Arc::new(SlowSink::new(Duration::from_secs(30))),
    );
    let dispatcher = Dispatcher::start(
        pipeline,
        DispatchConfig {
            workers: 1,
            queue_capacity: 1,
        },
    );

    dispatcher
        .submit(dirs.drop_file("stuck.csv", VALID))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || dispatcher.stats().in_flight == 1).await);

    assert!(!dispatcher.shutdown(Duration::from_millis(100)).await);

    assert_eq!(outcomes.len(), 0);
    assert_eq!(dirs.processing(), ["stuck.csv"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_file_loads_nothing_after_shutdown() {
    let dirs = TestLayout::new();
    let sink = Arc::new(SlowSink::new(Duration::from_millis(300)));
    let (pipeline, outcomes) = pipeline(&dirs.config(), sink.clone());
    let dispatcher = Dispatcher::start(
        pipeline,
        DispatchConfig {
            workers: 1,
            queue_capacity: 1,
        },
    );

    dispatcher
        .submit(dirs.drop_file("late.csv", VALID))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.peak() == 1).await);

    assert!(!dispatcher.shutdown(Duration::from_millis(20)).await);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(sink.inner.row_count("csv_data"), 0);
    assert_eq!(outcomes.len(), 0);
    assert_eq!(dirs.processing(), ["late.csv"]);
    assert!(dirs.done().is_empty());
}
