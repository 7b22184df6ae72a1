//! Moves files between the inbox, processing, done and error directories
//!
//! Renames are the only cross-worker exclusion: whoever renames a file out of
//! the inbox owns it until it is routed. All four directories must be on the
//! same filesystem for that to hold.

use crate::config::DirectoryLayout;
use crate::outcome::{
    Decision, FailureReason, OutcomeLog, OutcomeLogError, OutcomeStatus, ProcessingOutcome,
};
use crate::retry::{RetryFailure, RetryPolicy};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Attempts at a free name before a move gives up
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("could not claim {} after {attempts} attempt(s): {source}", path.display())]
    Claim {
        path: PathBuf,
        attempts: u32,
        /// The error was transient and the retry budget ran out
        exhausted: bool,
        #[source]
        source: io::Error,
    },

    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),

    #[error("could not scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Log(#[from] OutcomeLogError),
}

/// Filesystem errors caused by contention rather than a real problem
pub fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// A file owned by one worker, sitting in the processing directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFile {
    pub trace_id: Uuid,
    /// Where the file was found
    pub original: PathBuf,
    /// Where it is now
    pub path: PathBuf,
    /// Name it arrived under
    pub file_name: String,
}

pub struct Router {
    layout: DirectoryLayout,
    fs_retry: RetryPolicy,
    db_retry: RetryPolicy,
    outcomes: Arc<dyn OutcomeLog>,
}

impl Router {
    pub fn new(
        layout: DirectoryLayout,
        fs_retry: RetryPolicy,
        db_retry: RetryPolicy,
        outcomes: Arc<dyn OutcomeLog>,
    ) -> Self {
        Self {
            layout,
            fs_retry,
            db_retry,
            outcomes,
        }
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Take ownership of `path` by moving it into the processing directory
    ///
    /// `Ok(None)` means the file is gone: another worker claimed it first.
    pub async fn claim(&self, path: &Path) -> Result<Option<ClaimedFile>, RouteError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RouteError::NoFileName(path.to_path_buf()))?;

        let result = self
            .fs_retry
            .run("claim", is_transient_io, |_| {
                move_exclusive(path, &self.layout.processing, &file_name)
            })
            .await;

        let failure = match result {
            Ok(target) => {
                return Ok(Some(ClaimedFile {
                    trace_id: Uuid::new_v4(),
                    original: path.to_path_buf(),
                    path: target,
                    file_name,
                }))
            },
            Err(failure) => failure,
        };

        // NotFound also covers a missing processing directory.
        if failure.error.kind() == io::ErrorKind::NotFound && !exists(path).await {
            debug!(file = %file_name, "File already claimed elsewhere");
            return Ok(None);
        }

        Err(RouteError::Claim {
            path: path.to_path_buf(),
            attempts: failure.attempts,
            exhausted: failure.exhausted,
            source: failure.error,
        })
    }

    /// Route a file that could not be claimed straight from the inbox to error
    ///
    /// The outcome is recorded even when the file cannot be moved either, so
    /// it never sits in the inbox without one.
    pub async fn reject_unclaimed(&self, path: &Path, err: &RouteError) -> ProcessingOutcome {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let reason = match err {
            RouteError::Claim {
                attempts,
                exhausted: true,
                source,
                ..
            } => FailureReason::TransientIoError(format!(
                "claiming failed after {} attempt(s): {}",
                attempts, source
            )),
            other => FailureReason::UnexpectedFault(other.to_string()),
        };

        let unclaimed = ClaimedFile {
            trace_id: Uuid::new_v4(),
            original: path.to_path_buf(),
            path: path.to_path_buf(),
            file_name,
        };
        error!(
            trace_id = %unclaimed.trace_id,
            file = %unclaimed.file_name,
            error = %err,
            "Could not claim file, routing it to error"
        );

        self.route(unclaimed, Decision::Error(reason), None).await
    }

    /// Move a claimed file to its terminal directory and record the outcome
    ///
    /// Never fails: a file that cannot be moved at all stays where it is (a
    /// claimed file is recovered on the next start), and a failed outcome write
    /// is logged.
    pub async fn route(
        &self,
        claimed: ClaimedFile,
        decision: Decision,
        checksum: Option<String>,
    ) -> ProcessingOutcome {
        let (mut status, mut reason, rows_loaded) = match decision {
            Decision::Done { rows, .. } => (OutcomeStatus::Done, None, rows),
            Decision::Error(reason) => (OutcomeStatus::Error, Some(reason), 0),
        };

        let target_dir = match status {
            OutcomeStatus::Done => &self.layout.done,
            OutcomeStatus::Error => &self.layout.error,
        };

        let destination = match self.move_into(&claimed, target_dir).await {
            Ok(destination) => destination,
            Err(failure) if status == OutcomeStatus::Done => {
                error!(
                    trace_id = %claimed.trace_id,
                    file = %claimed.file_name,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Could not move loaded file to done, routing to error"
                );
                status = OutcomeStatus::Error;
                reason = Some(move_failure_reason(&failure));

                match self.move_into(&claimed, &self.layout.error).await {
                    Ok(destination) => destination,
                    Err(failure) => self.stranded(&claimed, &failure),
                }
            },
            Err(failure) => self.stranded(&claimed, &failure),
        };

        let outcome = ProcessingOutcome {
            trace_id: claimed.trace_id,
            file_name: claimed.file_name.clone(),
            status,
            destination,
            reason,
            rows_loaded,
            checksum,
            finished_at: Utc::now(),
        };

        self.record(&outcome).await;

        match &outcome.reason {
            None => info!(
                trace_id = %outcome.trace_id,
                file = %outcome.file_name,
                rows = outcome.rows_loaded,
                destination = %outcome.destination.display(),
                "File done"
            ),
            Some(reason) => warn!(
                trace_id = %outcome.trace_id,
                file = %outcome.file_name,
                reason = reason.kind(),
                detail = reason.detail(),
                destination = %outcome.destination.display(),
                "File rejected"
            ),
        }

        outcome
    }

    async fn move_into(
        &self,
        claimed: &ClaimedFile,
        dir: &Path,
    ) -> Result<PathBuf, RetryFailure<io::Error>> {
        self.fs_retry
            .run("move", is_transient_io, |_| {
                move_exclusive(&claimed.path, dir, &claimed.file_name)
            })
            .await
    }

    fn stranded(&self, claimed: &ClaimedFile, failure: &RetryFailure<io::Error>) -> PathBuf {
        error!(
            trace_id = %claimed.trace_id,
            file = %claimed.file_name,
            path = %claimed.path.display(),
            attempts = failure.attempts,
            error = %failure.error,
            "Could not route file, leaving it in place"
        );
        claimed.path.clone()
    }

    async fn record(&self, outcome: &ProcessingOutcome) {
        let result = self
            .db_retry
            .run("record outcome", OutcomeLogError::is_transient, |_| {
                self.outcomes.record(outcome)
            })
            .await;

        if let Err(failure) = result {
            error!(
                trace_id = %outcome.trace_id,
                file = %outcome.file_name,
                outcome_log = self.outcomes.kind(),
                attempts = failure.attempts,
                error = %failure.error,
                "Failed to record outcome"
            );
        }
    }

    /// Most recent outcome recorded for `file_name`
    pub async fn lookup(&self, file_name: &str) -> Result<Option<ProcessingOutcome>, RouteError> {
        self.db_retry
            .run("lookup outcome", OutcomeLogError::is_transient, |_| {
                self.outcomes.lookup(file_name)
            })
            .await
            .map_err(|failure| RouteError::Log(failure.error))
    }

    /// Move files a crashed run left in the processing directory back to the inbox
    ///
    /// Returns the inbox paths they were moved to.
    pub async fn recover_orphans(&self) -> Result<Vec<PathBuf>, RouteError> {
        let scan_error = |source| RouteError::Scan {
            path: self.layout.processing.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.layout.processing)
            .await
            .map_err(scan_error)?;

        let mut recovered = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().into_owned();
            match move_exclusive(&entry.path(), &self.layout.inbox, &file_name).await {
                Ok(target) => {
                    info!(file = %file_name, "Recovered orphaned file into the inbox");
                    recovered.push(target);
                },
                Err(err) => {
                    warn!(file = %file_name, error = %err, "Could not recover orphaned file");
                },
            }
        }

        Ok(recovered)
    }
}

fn move_failure_reason(failure: &RetryFailure<io::Error>) -> FailureReason {
    let detail = format!(
        "moving to done failed after {} attempt(s): {}",
        failure.attempts, failure.error
    );
    if failure.exhausted {
        FailureReason::TransientIoError(detail)
    } else {
        FailureReason::UnexpectedFault(detail)
    }
}

/// Move `source` into `dir` as `file_name`, or a timestamped variant when
/// that name is taken
///
/// The target name is reserved with an exclusive create before the rename
/// replaces the placeholder, so concurrent moves never land on the same path
/// and an existing file is never overwritten.
async fn move_exclusive(source: &Path, dir: &Path, file_name: &str) -> io::Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let target = dir.join(candidate_name(file_name, &stamp, attempt));
        let reserved = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await;
        match reserved {
            Ok(placeholder) => drop(placeholder),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }

        return match tokio::fs::rename(source, &target).await {
            Ok(()) => Ok(target),
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                    warn!(
                        path = %target.display(),
                        error = %cleanup,
                        "Could not remove name placeholder"
                    );
                }
                Err(err)
            },
        };
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", file_name, dir.display()),
    ))
}

/// `name`, then `stem_<stamp>.ext`, then `stem_<stamp>-N.ext`
fn candidate_name(file_name: &str, stamp: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    let suffix = if attempt == 1 {
        stamp.to_string()
    } else {
        format!("{}-{}", stamp, attempt - 1)
    };

    match extension {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", stem, suffix),
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
