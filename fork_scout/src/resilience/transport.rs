use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use super::{BackoffPolicy, CircuitBreaker};
use crate::api::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Timeout of every single attempt, independent of the retry loop.
    pub call_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            call_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Outbound attempts, retries included.
    pub calls_made: u64,
    pub retries: u64,
    /// Calls refused by the open circuit without any attempt.
    pub rejected: u64,
}

/// Wraps every outbound call with retries, backoff and the circuit breaker.
pub struct ResilientTransport {
    breaker: Arc<CircuitBreaker>,
    config: RetryConfig,
    calls_made: AtomicU64,
    retries: AtomicU64,
    rejected: AtomicU64,
}

impl ResilientTransport {
    pub fn new(breaker: Arc<CircuitBreaker>, config: RetryConfig) -> Self {
        ResilientTransport {
            breaker,
            config,
            calls_made: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn calls_made(&self) -> u64 {
        self.calls_made.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            calls_made: self.calls_made(),
            retries: self.retries.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Runs `operation` until it succeeds, fails with a terminal error, exhausts `max_retries` or the circuit opens.
    ///
    /// Rate limit and transient failures are retried and count against the circuit. Terminal failures are returned
    /// immediately and count against the circuit only when they reflect endpoint health.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if !self.breaker.allow().await {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Circuit open, rejecting {}", operation_name);
                return Err(Error::CircuitOpen(operation_name.to_string()));
            }

            self.calls_made.fetch_add(1, Ordering::Relaxed);
            let outcome = match tokio::time::timeout(self.config.call_timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::TransientNetwork(format!(
                    "{} timed out after {:?}",
                    operation_name, self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record_success().await;
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    self.breaker.record_failure().await;
                    if attempt >= self.config.max_retries {
                        error!("{} failed after {} attempts: {}", operation_name, attempt + 1, err);
                        return Err(Error::RetriesExhausted {
                            operation: operation_name.to_string(),
                            attempts: attempt + 1,
                            source: Box::new(err),
                        });
                    }
                    let delay = self.config.backoff.next_delay(attempt, err.rate_limit_signal());
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {:.1}s",
                        operation_name,
                        attempt + 1,
                        err,
                        delay.as_secs_f64()
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.affects_endpoint_health() {
                        self.breaker.record_failure().await;
                    } else {
                        self.breaker.record_neutral().await;
                    }
                    debug!("{} failed: {}", operation_name, err);
                    return Err(err);
                }
            }
        }
    }
}
