//! Retry, backoff and circuit breaking around single outbound calls.

mod backoff;
mod breaker;
mod transport;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use transport::{ResilientTransport, RetryConfig, TransportStats};
