use std::time::Duration;

use log::{info, warn};
use strum_macros::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is let through.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

/// Gates calls to a remote endpoint after repeated failures.
///
/// While half open exactly one trial call is admitted. A trial that never reports back (its future was
/// dropped) is considered lost after `open_timeout` and another trial is admitted.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_started_at: None,
            }),
        }
    }

    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|opened_at| opened_at.elapsed());
                if elapsed.map_or(true, |elapsed| elapsed >= self.config.open_timeout) {
                    info!("Circuit half open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match inner.trial_started_at {
                Some(started) if started.elapsed() < self.config.open_timeout => false,
                _ => {
                    inner.trial_started_at = Some(Instant::now());
                    true
                }
            },
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            info!("Circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures = inner.failures.saturating_add(1);
        let trips = match inner.state {
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trips {
            warn!(
                "Circuit open after {} consecutive failures, pausing calls for {:?}",
                inner.failures, self.config.open_timeout
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_started_at = None;
        }
    }

    /// Outcome that says nothing about endpoint health. Frees the half open trial slot.
    pub async fn record_neutral(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::HalfOpen {
            inner.trial_started_at = None;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failures
    }
}
