//! Circuit breaker guarding datastore commands.
//!
//! Closed lets every command through. After `failure_threshold`
//! consecutive failures it opens and rejects commands until
//! `reset_timeout` has elapsed, then half-opens and lets probes through;
//! `success_threshold` probe successes close it again, any probe failure
//! reopens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the metrics exporter.
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::RedisConfig> for CircuitBreakerConfig {
    fn from(config: &crate::config::RedisConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_failure_threshold,
            success_threshold: config.circuit_breaker_success_threshold,
            reset_timeout: Duration::from_secs(config.circuit_breaker_reset_timeout_seconds),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    changed_at: Instant,
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                changed_at: Instant::now(),
            }),
            config,
        }
    }

    /// Current state, half-opening an expired open circuit on the way.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed);
                    tracing::info!("Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    let failures = inner.failures;
                    Self::transition(&mut inner, CircuitState::Open);
                    tracing::warn!(failures, "Circuit breaker opened due to failures");
                }
            }
            CircuitState::HalfOpen => {
                Self::transition(&mut inner, CircuitState::Open);
                tracing::warn!("Circuit breaker reopened after failure in half-open state");
            }
            CircuitState::Open => inner.changed_at = Instant::now(),
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && inner.changed_at.elapsed() >= self.config.reset_timeout
        {
            Self::transition(inner, CircuitState::HalfOpen);
            tracing::info!("Circuit breaker transitioning to half-open state");
        }
    }

    fn transition(inner: &mut BreakerInner, state: CircuitState) {
        inner.state = state;
        inner.changed_at = Instant::now();
        inner.successes = 0;
        if state == CircuitState::Closed {
            inner.failures = 0;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
