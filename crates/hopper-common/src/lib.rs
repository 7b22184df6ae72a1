//! Hopper Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and checksum helpers for the Hopper workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`HopperError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 fingerprints recorded alongside every ingested file
//!
//! # Example
//!
//! ```no_run
//! use hopper_common::checksum::file_sha256;
//! use hopper_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let digest = file_sha256(path)?;
//!     tracing::info!(%digest, "fingerprinted file");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{HopperError, Result};
