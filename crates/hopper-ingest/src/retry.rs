//! Bounded retry with configurable backoff
//!
//! Both retry budgets (sink writes and filesystem moves) go through
//! [`RetryPolicy::run`]. The caller decides which errors are worth another
//! attempt; anything else is returned immediately.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// `delay * attempt`
    Linear,
    /// `delay * 2^(attempt - 1)`
    Exponential,
}

impl std::str::FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" | "constant" => Ok(Backoff::Fixed),
            "linear" => Ok(Backoff::Linear),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff '{}'", other)),
        }
    }
}

impl std::fmt::Display for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backoff::Fixed => f.write_str("fixed"),
            Backoff::Linear => f.write_str("linear"),
            Backoff::Exponential => f.write_str("exponential"),
        }
    }
}

/// Retry budget for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    pub delay: Duration,
    pub backoff: Backoff,
}

/// The last error of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made before giving up
    pub attempts: u32,
    /// True when the error was transient and the budget ran out
    pub exhausted: bool,
    pub error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Single attempt, no sleeping
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.delay.saturating_mul(factor)
            },
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent
    ///
    /// `op` receives the 1-based attempt number. `operation` names the work in
    /// log lines.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        is_transient: P,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                },
                Err(error) if !is_transient(&error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        exhausted: false,
                        error,
                    });
                },
                Err(error) if attempt == max_attempts => {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(RetryFailure {
                        attempts: attempt,
                        exhausted: true,
                        error,
                    });
                },
                Err(error) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Transient failure, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }

        // The loop returns on its last iteration.
        unreachable!("retry loop always returns")
    }
}
