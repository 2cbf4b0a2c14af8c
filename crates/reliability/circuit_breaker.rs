use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Returned (and downcastable) when the breaker short-circuits a call
/// without a fallback.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker is open, refusing call to {service}")]
pub struct CircuitOpen {
    pub service: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// How long an OPEN circuit waits before letting a probe through.
    pub timeout: Duration,
    /// Counters reset wholesale once this much time passed since the last
    /// failure, independent of state transitions.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub requests: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    requests: u64,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            requests: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// A fault-isolation gate in front of an unreliable upstream. It never
/// retries on its own: callers that want retries layer them outside.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluates the gate for one call. Returns true when the wrapped
    /// operation may run, false when the circuit is open.
    fn admit(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        inner.requests += 1;

        if let Some(last_failure) = inner.last_failure_at {
            let since_failure = (now - last_failure)
                .to_std()
                .unwrap_or(Duration::ZERO);

            if inner.state != CircuitState::Open
                && since_failure >= self.config.monitoring_period
            {
                inner.failures = 0;
                inner.successes = 0;
            }

            if inner.state == CircuitState::Open && since_failure >= self.config.timeout {
                info!(service = %self.service, "circuit breaker half-open, probing");
                inner.state = CircuitState::HalfOpen;
            }
        }

        inner.state != CircuitState::Open
    }

    fn record_success(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.successes += 1;
        inner.last_success_at = Some(now);

        if inner.state == CircuitState::HalfOpen {
            // One successful probe closes the circuit.
            info!(service = %self.service, "circuit breaker closed after successful probe");
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.successes = 0;
        }
    }

    fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(service = %self.service, "circuit breaker reopened, probe failed");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                warn!(
                    service = %self.service,
                    failures = inner.failures,
                    "circuit breaker opened"
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Runs `operation` through the gate. While the circuit is open the
    /// operation is never invoked and the call fails fast with [`CircuitOpen`].
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.admit(Utc::now()) {
            return Err(CircuitOpen {
                service: self.service.clone(),
            }
            .into());
        }

        match operation().await {
            Ok(value) => {
                self.record_success(Utc::now());
                Ok(value)
            }
            Err(err) => {
                self.record_failure(Utc::now());
                Err(err)
            }
        }
    }

    /// Like [`execute`](Self::execute), but while the circuit is open the
    /// fallback value is returned instead of an error.
    pub async fn execute_with_fallback<T, F, Fut, FB>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> T,
    {
        if !self.admit(Utc::now()) {
            return Ok(fallback());
        }

        match operation().await {
            Ok(value) => {
                self.record_success(Utc::now());
                Ok(value)
            }
            Err(err) => {
                self.record_failure(Utc::now());
                Err(err)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            service: self.service.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            requests: inner.requests,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }

    /// Operator escape hatch: forces CLOSED and zeroes all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::new();
        info!(service = %self.service, "circuit breaker manually reset");
    }
}
