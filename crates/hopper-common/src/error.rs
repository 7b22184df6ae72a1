//! Error types for Hopper

use thiserror::Error;

/// Result type alias for Hopper operations
pub type Result<T> = std::result::Result<T, HopperError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum HopperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
