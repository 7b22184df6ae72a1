//! Per-file processing: claim, validate, load, route
//!
//! Once [`Pipeline::process`] claims a file it is routed exactly once,
//! whatever happens in between; panics in the stages are caught at the task
//! boundary and become an `UnexpectedFault`. The one exception is a file
//! abandoned at shutdown, which stays claimed until the next start.

use crate::dataset::Schema;
use crate::loader::{LoadError, Loader};
use crate::outcome::{Decision, FailureReason, ProcessingOutcome};
use crate::router::{ClaimedFile, RouteError, Router};
use crate::validator::Validator;
use anyhow::Context;
use hopper_common::checksum::file_sha256;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

pub struct Pipeline {
    validator: Arc<Validator>,
    loader: Loader,
    router: Router,
}

impl Pipeline {
    pub fn new(validator: Validator, loader: Loader, router: Router) -> Self {
        Self {
            validator: Arc::new(validator),
            loader,
            router,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Process one detected file to a terminal state
    ///
    /// Returns `None` when another worker already claimed the file; nothing
    /// is routed in that case. A file that cannot be claimed for any other
    /// reason is routed to error from the inbox.
    pub async fn process(self: Arc<Self>, path: PathBuf) -> Option<ProcessingOutcome> {
        self.process_until(path, CancellationToken::new()).await
    }

    /// [`Pipeline::process`], giving up on the file when `abandon` fires
    ///
    /// Only the validate and load stages are abandoned: their task is aborted
    /// and the file stays in the processing directory for the next start. Once
    /// routing has begun it runs to completion.
    pub async fn process_until(
        self: Arc<Self>,
        path: PathBuf,
        abandon: CancellationToken,
    ) -> Option<ProcessingOutcome> {
        let claimed = match self.router.claim(&path).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return None,
            Err(err @ RouteError::Claim { .. }) => {
                return Some(self.router.reject_unclaimed(&path, &err).await);
            },
            Err(err) => {
                error!(path = %path.display(), error = %err, "Failed to claim file");
                return None;
            },
        };

        let span = info_span!(
            "file",
            trace_id = %claimed.trace_id,
            file = %claimed.file_name
        );

        async move {
            info!("Processing file");

            let mut stages = tokio::spawn({
                let pipeline = Arc::clone(&self);
                let claimed = claimed.clone();
                async move { pipeline.run_stages(&claimed).await }.in_current_span()
            });

            let joined = tokio::select! {
                joined = &mut stages => joined,
                _ = abandon.cancelled() => {
                    stages.abort();
                    warn!(
                        path = %claimed.path.display(),
                        "Abandoning file, leaving it in the processing directory"
                    );
                    return None;
                },
            };

            let (decision, checksum) = match joined {
                Ok(result) => result,
                Err(err) => {
                    let message = if err.is_panic() {
                        format!("panic while processing: {}", panic_message(err.into_panic()))
                    } else {
                        format!("processing task aborted: {}", err)
                    };
                    error!(operation = "process", error = %message, "Worker fault");
                    (Decision::Error(FailureReason::UnexpectedFault(message)), None)
                },
            };

            Some(self.router.route(claimed, decision, checksum).await)
        }
        .instrument(span)
        .await
    }

    /// Validate then load; the returned decision is what gets routed
    async fn run_stages(&self, claimed: &ClaimedFile) -> (Decision, Option<String>) {
        let path = claimed.path.clone();
        let validator = Arc::clone(&self.validator);

        let inspected = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let checksum = file_sha256(&path).context("Failed to checksum file")?;
            let (file, report) = validator
                .validate_path(&path)
                .context("Failed to read file")?;
            Ok((checksum, file, report))
        })
        .await;

        let (checksum, file, report) = match inspected {
            Ok(Ok(inspected)) => inspected,
            Ok(Err(err)) => {
                let message = format!("{:#}", err);
                error!(operation = "validate", error = %message, "Could not validate file");
                return (fault(message), None);
            },
            Err(err) if err.is_panic() => {
                let message = format!("panic in validator: {}", panic_message(err.into_panic()));
                error!(operation = "validate", error = %message, "Worker fault");
                return (fault(message), None);
            },
            Err(err) => return (fault(err.to_string()), None),
        };

        for check in report.warnings() {
            for message in &check.messages {
                warn!(check = %check.kind, "{}", message);
            }
        }

        if !report.is_valid() {
            let summary = report
                .failure_summary()
                .unwrap_or_else(|| "validation failed".to_string());
            let check = report
                .first_failure()
                .map(|c| c.kind.label())
                .unwrap_or("unknown");
            warn!(check, rows = report.rows, "Validation failed");
            return (
                Decision::Error(FailureReason::ValidationFailure(summary)),
                Some(checksum),
            );
        }

        let (Ok(delimiter), Ok(schema)) = (file.delimiter.clone(), Schema::new(&report.columns))
        else {
            return (
                fault("validated file has no usable delimiter or header".to_string()),
                Some(checksum),
            );
        };

        info!(rows = report.rows, columns = schema.len(), "Validation passed");

        let decision = match self
            .loader
            .load(&claimed.path, &schema, delimiter, report.rows)
            .await
        {
            Ok(summary) => Decision::Done {
                table: summary.table,
                rows: summary.rows,
            },
            Err(err @ LoadError::Exhausted { .. }) => {
                error!(operation = "load", error = %err, "Sink retries exhausted");
                Decision::Error(FailureReason::TransientStorageError(err.to_string()))
            },
            Err(err) => {
                error!(operation = "load", error = %err, "Load failed");
                fault(err.to_string())
            },
        };

        (decision, Some(checksum))
    }
}

fn fault(message: String) -> Decision {
    Decision::Error(FailureReason::UnexpectedFault(message))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
