//! Hopper Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Watches an inbox directory for delimited text files, validates each one,
//! loads valid files into a relational sink and routes every file to a
//! terminal `done` or `error` directory.
//!
//! # Architecture
//!
//! ```text
//! Watcher -> Dispatcher -> Pipeline { Validator -> Loader -> Router }
//! ```
//!
//! - [`watcher`]: polls the inbox and submits new files
//! - [`dispatcher`]: bounded queue plus a fixed number of concurrent workers
//! - [`pipeline`]: claims a file and runs the stages for it in one task
//! - [`validator`]: the canonical check chain producing a [`validator::ValidationReport`]
//! - [`loader`]: one transaction per attempt against a [`sink::Sink`]
//! - [`router`]: moves files between directories and records outcomes
//!
//! Every claimed file produces exactly one [`outcome::ProcessingOutcome`].

pub mod config;
pub mod daemon;
pub mod dataset;
pub mod db;
pub mod dispatcher;
pub mod loader;
pub mod outcome;
pub mod pipeline;
pub mod retry;
pub mod router;
pub mod sink;
pub mod validator;
pub mod watcher;

pub use config::{ConfigError, DirectoryLayout, IngestConfig};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use outcome::{FailureReason, OutcomeStatus, ProcessingOutcome};
pub use pipeline::Pipeline;
pub use validator::{ValidationReport, Validator};
