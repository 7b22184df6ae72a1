//! Postgres connection pool and error classification

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database configuration error: {0}. Check DATABASE_URL and connection settings.")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/hopper".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 10,
        }
    }
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    if config.min_connections > config.max_connections {
        return Err(DbError::Config(format!(
            "min connections ({}) exceeds max connections ({})",
            config.min_connections, config.max_connections
        )));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Whether a SQLSTATE names a condition worth retrying
///
/// Connection exceptions (`08`), insufficient resources (`53`), operator
/// intervention such as admin shutdown (`57P0x`), serialization failures and
/// deadlocks.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P0")
        || code == "40001"
        || code == "40P01"
}

/// Whether a driver error is likely to go away on retry
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_sqlstate_classification() {
        for code in ["08006", "08001", "53300", "57P01", "40001", "40P01"] {
            assert!(is_transient_sqlstate(code), "{} should be transient", code);
        }
        for code in ["23505", "42P01", "22P02", "57014"] {
            assert!(!is_transient_sqlstate(code), "{} should be permanent", code);
        }
    }

    #[test]
    fn test_driver_error_classification() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer"
        ))));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }

    #[tokio::test]
    async fn test_rejects_inverted_pool_bounds() {
        let config = DatabaseConfig {
            min_connections: 20,
            ..DatabaseConfig::default()
        };
        assert!(matches!(create_pool(&config).await, Err(DbError::Config(_))));
    }
}
