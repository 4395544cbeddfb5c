use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    circuit_opened_at: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    /// Set while HALF_OPEN's single trial call is outstanding, so a second
    /// concurrent caller is turned away instead of being let through
    /// alongside it.
    half_open_probe_in_flight: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            circuit_opened_at: None,
            total_calls: 0,
            total_failures: 0,
            half_open_probe_in_flight: false,
        }
    }
}

/// Snapshot of a breaker's health, readable at any time without invoking it.
#[derive(Debug, Clone)]
pub struct BreakerTelemetry {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub time_until_reset: Option<Duration>,
}

/// A single service's circuit breaker: CLOSED -> OPEN after
/// `failure_threshold` consecutive failures, OPEN -> HALF_OPEN after
/// `reset_timeout`, HALF_OPEN -> CLOSED on success or back to OPEN on
/// failure.
struct Breaker {
    state: RwLock<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl Breaker {
    fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState::default()),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Returns `Ok(())` when a call may proceed, transitioning OPEN ->
    /// HALF_OPEN if the reset timeout has elapsed. HALF_OPEN admits exactly
    /// one in-flight probe; concurrent callers while that probe is
    /// outstanding fail fast just like OPEN.
    async fn admit(&self) -> Result<(), AppError> {
        let mut guard = self.state.write().await;
        match guard.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if guard.half_open_probe_in_flight {
                    Err(AppError::Unavailable("Circuit breaker is OPEN".into()))
                } else {
                    guard.half_open_probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let elapsed = guard
                    .circuit_opened_at
                    .map(|opened_at| Utc::now() - opened_at)
                    .unwrap_or_default();
                if elapsed
                    >= chrono::Duration::from_std(self.reset_timeout).unwrap_or_default()
                {
                    guard.state = CircuitState::HalfOpen;
                    guard.half_open_probe_in_flight = true;
                    Ok(())
                } else {
                    Err(AppError::Unavailable("Circuit breaker is OPEN".into()))
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut guard = self.state.write().await;
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.circuit_opened_at = None;
        guard.half_open_probe_in_flight = false;
    }

    async fn record_failure(&self) {
        let mut guard = self.state.write().await;
        guard.total_failures += 1;
        guard.failure_count += 1;
        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.circuit_opened_at = Some(Utc::now());
                guard.half_open_probe_in_flight = false;
            }
            CircuitState::Closed if guard.failure_count >= self.failure_threshold => {
                guard.state = CircuitState::Open;
                guard.circuit_opened_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    async fn telemetry(&self, service: &str) -> BreakerTelemetry {
        let guard = self.state.read().await;
        let time_until_reset = match (guard.state, guard.circuit_opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let elapsed = Utc::now() - opened_at;
                let remaining = chrono::Duration::from_std(self.reset_timeout)
                    .unwrap_or_default()
                    - elapsed;
                remaining.to_std().ok()
            }
            _ => None,
        };
        BreakerTelemetry {
            service: service.to_string(),
            state: guard.state,
            failure_count: guard.failure_count,
            total_calls: guard.total_calls,
            total_failures: guard.total_failures,
            time_until_reset,
        }
    }
}

/// Indexes breakers by service name and provides `execute(service, fn)`.
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerManager {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            failure_threshold,
            reset_timeout,
        }
    }

    async fn breaker_for(&self, service: &str) -> Arc<Breaker> {
        if let Some(existing) = self.breakers.read().await.get(service) {
            return existing.clone();
        }
        let mut guard = self.breakers.write().await;
        guard
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(self.failure_threshold, self.reset_timeout)))
            .clone()
    }

    /// Runs `f` through the named service's breaker: fails fast while OPEN,
    /// otherwise invokes `f` and records the outcome.
    pub async fn execute<F, Fut, T>(&self, service: &str, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let breaker = self.breaker_for(service).await;
        breaker.admit().await?;

        {
            let mut guard = breaker.state.write().await;
            guard.total_calls += 1;
        }

        match f().await {
            Ok(value) => {
                breaker.record_success().await;
                Ok(value)
            }
            Err(err) => {
                warn!(service, error = %err, "circuit breaker recorded a failure");
                breaker.record_failure().await;
                Err(err)
            }
        }
    }

    pub async fn telemetry(&self, service: &str) -> BreakerTelemetry {
        self.breaker_for(service).await.telemetry(service).await
    }

    pub async fn all_telemetry(&self) -> Vec<BreakerTelemetry> {
        let guard = self.breakers.read().await;
        let mut out = Vec::with_capacity(guard.len());
        for (service, breaker) in guard.iter() {
            out.push(breaker.telemetry(service).await);
        }
        out
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        info!("initializing circuit breaker manager with default thresholds");
        Self::new(5, Duration::from_millis(30_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_fails_fast() {
        let manager = CircuitBreakerManager::new(5, Duration::from_millis(30_000));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let calls = calls.clone();
            let _ = manager
                .execute("generator", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AppError::Internal("boom".into()))
                })
                .await;
        }

        let calls_before = calls.load(Ordering::SeqCst);
        let result = manager
            .execute("generator", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls_before, 5, "the sixth call must not invoke the function");

        let telemetry = manager.telemetry("generator").await;
        assert_eq!(telemetry.state, CircuitState::Open);
        assert_eq!(telemetry.failure_count, 5);
    }

    #[tokio::test]
    async fn half_open_success_resets_to_closed() {
        let manager = CircuitBreakerManager::new(1, Duration::from_millis(1));

        let _ = manager
            .execute("embed", || async { Err::<(), _>(AppError::Internal("x".into())) })
            .await;
        assert_eq!(
            manager.telemetry("embed").await.state,
            CircuitState::Open
        );

        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = manager.execute("embed", || async { Ok::<_, AppError>(()) }).await;
        assert!(result.is_ok());
        let telemetry = manager.telemetry("embed").await;
        assert_eq!(telemetry.state, CircuitState::Closed);
        assert_eq!(telemetry.failure_count, 0);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        let breaker = Breaker::new(1, Duration::from_millis(1));

        breaker.record_failure().await;
        assert_eq!(breaker.state.read().await.state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;

        breaker.admit().await.expect("first caller starts the probe");
        assert_eq!(breaker.state.read().await.state, CircuitState::HalfOpen);

        let second = breaker.admit().await;
        assert!(second.is_err(), "a second concurrent caller must not ride along with the probe");

        breaker.record_success().await;
        assert_eq!(breaker.state.read().await.state, CircuitState::Closed);
        breaker.admit().await.expect("closed state admits freely again");
    }
}
