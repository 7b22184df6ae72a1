//! Bounded worker pool
//!
//! Detected files wait in a bounded queue; a semaphore caps how many are
//! inside the pipeline at once. The dispatch loop takes a permit before it
//! takes a file, so a full pool leaves files queued and a full queue makes
//! [`Submitter::submit`] wait.

use crate::outcome::ProcessingOutcome;
use crate::pipeline::Pipeline;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcomes buffered for slow subscribers
const OUTCOME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Files processed concurrently
    pub workers: usize,
    /// Detected files waiting for a worker
    pub queue_capacity: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
}

/// Handle for feeding paths into the dispatcher
#[derive(Debug, Clone)]
pub struct Submitter {
    sender: mpsc::Sender<PathBuf>,
}

impl Submitter {
    /// Queue a path, waiting while the queue is full
    pub async fn submit(&self, path: PathBuf) -> Result<(), DispatchError> {
        self.sender.send(path).await.map_err(|_| DispatchError::Closed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Files inside the pipeline right now
    pub in_flight: usize,
    /// Highest `in_flight` seen since start
    pub peak_in_flight: usize,
    /// Submissions fully handled, routed or not
    pub finished: u64,
}

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicU64,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
        }
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.finished.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Dispatcher {
    submitter: Submitter,
    outcomes: broadcast::Sender<ProcessingOutcome>,
    gauge: Arc<Gauge>,
    cancel: CancellationToken,
    abandon: CancellationToken,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the dispatch loop
    pub fn start(pipeline: Arc<Pipeline>, config: DispatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);
        let gauge = Arc::new(Gauge::default());
        let cancel = CancellationToken::new();
        let abandon = CancellationToken::new();

        let handle = tokio::spawn(dispatch_loop(
            pipeline,
            receiver,
            Arc::new(Semaphore::new(config.workers.max(1))),
            Arc::clone(&gauge),
            outcomes.clone(),
            cancel.clone(),
            abandon.clone(),
        ));

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Dispatcher started"
        );

        Self {
            submitter: Submitter { sender },
            outcomes,
            gauge,
            cancel,
            abandon,
            handle,
        }
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, path: PathBuf) -> Result<(), DispatchError> {
        self.submitter.submit(path).await
    }

    /// Receive every outcome produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingOutcome> {
        self.outcomes.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        self.gauge.snapshot()
    }

    /// Stop taking work and wait for in-flight files
    ///
    /// Queued files stay where they are (in the inbox). Returns `false` when
    /// in-flight files did not finish within `timeout`. Files still being
    /// validated or loaded are then abandoned in the processing directory and
    /// recovered on the next start; files already being routed finish their
    /// move and outcome record first.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let joined = tokio::time::timeout(timeout, &mut self.handle).await;
        match joined {
            Ok(Ok(())) => {
                info!(stats = ?self.gauge.snapshot(), "Dispatcher stopped");
                true
            },
            Ok(Err(err)) => {
                error!(error = %err, "Dispatch loop failed");
                false
            },
            Err(_) => {
                warn!(
                    in_flight = self.gauge.snapshot().in_flight,
                    "Shutdown timed out, abandoning in-flight files"
                );
                self.abandon.cancel();
                if let Err(err) = self.handle.await {
                    error!(error = %err, "Dispatch loop failed");
                }
                false
            },
        }
    }
}

async fn dispatch_loop(
    pipeline: Arc<Pipeline>,
    mut receiver: mpsc::Receiver<PathBuf>,
    semaphore: Arc<Semaphore>,
    gauge: Arc<Gauge>,
    outcomes: broadcast::Sender<ProcessingOutcome>,
    cancel: CancellationToken,
    abandon: CancellationToken,
) {
    let mut tasks = JoinSet::new();

    loop {
        while let Some(result) = tasks.try_join_next() {
            log_task_result(result);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let path = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            path = receiver.recv() => match path {
                Some(path) => path,
                None => break,
            },
        };

        debug!(path = %path.display(), "Dispatching file");
        let guard = gauge.enter();
        let pipeline = Arc::clone(&pipeline);
        let outcomes = outcomes.clone();
        let abandon = abandon.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            if let Some(outcome) = pipeline.process_until(path, abandon).await {
                // No subscribers is fine.
                let _ = outcomes.send(outcome);
            }
        });
    }

    receiver.close();
    let mut left_queued = 0;
    while receiver.try_recv().is_ok() {
        left_queued += 1;
    }
    if left_queued > 0 {
        info!(files = left_queued, "Leaving queued files in the inbox for the next run");
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "Waiting for in-flight files");
    }
    while let Some(result) = tasks.join_next().await {
        log_task_result(result);
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        error!(error = %err, "Worker task failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = Arc::new(Gauge::default());

        let a = gauge.enter();
        let b = gauge.enter();
        assert_eq!(gauge.snapshot().in_flight, 2);
        drop(a);
        let c = gauge.enter();
        drop(b);
        drop(c);

        let stats = gauge.snapshot();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.finished, 3);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let submitter = Submitter { sender };

        assert_eq!(
            submitter.submit(PathBuf::from("a.csv")).await,
            Err(DispatchError::Closed)
        );
    }
}
