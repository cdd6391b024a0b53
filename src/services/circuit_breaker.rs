//! Circuit breaker: isolate a failing callee so repeated calls fail fast
//! instead of exhausting resources.
//!
//! A closed/open/half-open state machine with failure/success counters
//! and failure-history tracking, keyed by a plain `String` name and
//! generalized into a `CircuitBreakerManager` registry so any number of
//! named callees can each hold their own breaker.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::domain::error::BreakerError;
use crate::services::event_bus::{EventBus, EventCategory, EventPayload, EventSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: ChronoDuration,
    pub half_open_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: ChronoDuration::seconds(30),
            half_open_limit: 1,
        }
    }
}

/// `{state, failures, successes, lastFailureTime?, lastSuccessTime?,
/// nextAttempt?, halfOpenRequests, totalRequests, rejectedRequests}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
    pub half_open_requests: u32,
    pub total_requests: u64,
    pub rejected_requests: u64,
}

/// Outcome of a guarded call: either the breaker itself refused admission,
/// or the wrapped call ran and failed on its own terms.
#[derive(Debug)]
pub enum BreakerCallError<E> {
    Breaker(BreakerError),
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerCallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breaker(e) => write!(f, "{e}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for BreakerCallError<E> {}

fn namespace_error(name: &str, err: BreakerError) -> BreakerError {
    match err {
        BreakerError::BreakerOpen { retry_after_ms, .. } => {
            BreakerError::BreakerOpen { name: name.to_string(), retry_after_ms }
        }
        BreakerError::HalfOpenExhausted(_) => BreakerError::HalfOpenExhausted(name.to_string()),
    }
}

/// A single named breaker. Exactly one state at any time; counters are
/// monotone within a state epoch and reset on transition.
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    next_attempt: Option<DateTime<Utc>>,
    half_open_requests: u32,
    total_requests: u64,
    rejected_requests: u64,
    last_transition_at: DateTime<Utc>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            last_success_time: None,
            next_attempt: None,
            half_open_requests: 0,
            total_requests: 0,
            rejected_requests: 0,
            last_transition_at: Utc::now(),
        }
    }

    fn stats(&self) -> CircuitStats {
        CircuitStats {
            state: self.state,
            failures: self.failures,
            successes: self.successes,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            next_attempt: self.next_attempt,
            half_open_requests: self.half_open_requests,
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
        }
    }

    /// Returns `Ok(())` if the call may proceed, transitioning
    /// open -> half-open when `nextAttempt` has passed.
    fn admit(&mut self) -> Result<(), BreakerError> {
        match self.state {
            CircuitState::Closed => {
                self.total_requests += 1;
                Ok(())
            }
            CircuitState::Open => {
                let now = Utc::now();
                if self.next_attempt.map(|t| now >= t).unwrap_or(false) {
                    self.transition_to(CircuitState::HalfOpen);
                    self.total_requests += 1;
                    self.half_open_requests += 1;
                    Ok(())
                } else {
                    self.rejected_requests += 1;
                    let retry_after_ms = self
                        .next_attempt
                        .map(|t| (t - now).num_milliseconds().max(0))
                        .unwrap_or(0);
                    Err(BreakerError::BreakerOpen { name: String::new(), retry_after_ms })
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_requests >= self.config.half_open_limit {
                    self.rejected_requests += 1;
                    Err(BreakerError::HalfOpenExhausted(String::new()))
                } else {
                    self.total_requests += 1;
                    self.half_open_requests += 1;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.last_success_time = Some(Utc::now());
        match self.state {
            CircuitState::Closed => {
                self.failures = 0;
            }
            CircuitState::HalfOpen => {
                self.successes += 1;
                if self.successes >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self) {
        self.last_failure_time = Some(Utc::now());
        match self.state {
            CircuitState::Closed => {
                self.failures += 1;
                if self.failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to(&mut self, new_state: CircuitState) {
        self.state = new_state;
        self.last_transition_at = Utc::now();
        match new_state {
            CircuitState::Open => {
                self.next_attempt = Some(Utc::now() + self.config.timeout);
                self.half_open_requests = 0;
            }
            CircuitState::HalfOpen => {
                self.failures = 0;
                self.successes = 0;
            }
            CircuitState::Closed => {
                self.failures = 0;
                self.successes = 0;
                self.half_open_requests = 0;
                self.next_attempt = None;
            }
        }
    }
}

/// Keyed registry of named breakers sharing a default config.
pub struct CircuitBreakerManager {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    event_bus: Arc<EventBus>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig, event_bus: Arc<EventBus>) -> Self {
        Self { default_config, breakers: RwLock::new(HashMap::new()), event_bus }
    }

    /// Create-or-get the named breaker. `override_config` replaces the
    /// default only on first creation.
    async fn ensure_breaker(&self, name: &str, override_config: Option<CircuitBreakerConfig>) {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(override_config.unwrap_or_else(|| self.default_config.clone())));
    }

    pub async fn get_stats(&self, name: &str) -> Option<CircuitStats> {
        self.breakers.read().await.get(name).map(CircuitBreaker::stats)
    }

    /// Run `f` under the named breaker: checks admission, records the
    /// outcome, and propagates the original error on failure. `BreakerOpen`
    /// and `HalfOpenExhausted` are surfaced distinctly from `f`'s own error.
    #[instrument(skip(self, f), fields(breaker = %name))]
    pub async fn execute<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, BreakerCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.ensure_breaker(name, None).await;

        let transition = {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers.get_mut(name).expect("ensured above");
            let old_state = breaker.state;
            breaker.admit().map_err(|e| namespace_error(name, e)).map_err(BreakerCallError::Breaker)?;
            (old_state, breaker.state)
        };
        if transition.0 != transition.1 {
            self.emit_state_changed(name, transition.0, transition.1, 0, 0).await;
        }

        let outcome = f().await;

        let transition = {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers.get_mut(name).expect("ensured above");
            let old_state = breaker.state;
            match &outcome {
                Ok(_) => breaker.record_success(),
                Err(e) => {
                    warn!(breaker = name, error = %e, "circuit breaker recorded failure");
                    breaker.record_failure();
                }
            }
            // half_open_requests gates concurrent trials, not cumulative
            // ones; release the slot once this call has settled, unless the
            // transition already reset it (open/closed do this themselves).
            if breaker.state == CircuitState::HalfOpen {
                breaker.half_open_requests = breaker.half_open_requests.saturating_sub(1);
            }
            (old_state, breaker.state, breaker.failures, breaker.successes)
        };
        if transition.0 != transition.1 {
            self.emit_state_changed(name, transition.0, transition.1, transition.2, transition.3).await;
        }

        outcome.map_err(BreakerCallError::Inner)
    }

    async fn emit_state_changed(&self, name: &str, old: CircuitState, new: CircuitState, failures: u32, successes: u32) {
        if old == new {
            return;
        }
        info!(breaker = name, from = old.as_str(), to = new.as_str(), "circuit breaker state changed");
        self.event_bus
            .publish(
                EventCategory::CircuitBreaker,
                EventSeverity::Warning,
                EventPayload::CircuitBreakerStateChanged {
                    name: name.to_string(),
                    old_state: old.as_str().to_string(),
                    new_state: new.as_str().to_string(),
                    failures,
                    successes,
                },
            )
            .await;
    }

    /// Auto-reset breakers that have been `open` for longer than
    /// `2 × timeout` with no intervening activity.
    pub async fn run_maintenance_sweep(&self) {
        let mut to_reset = Vec::new();
        {
            let breakers = self.breakers.read().await;
            let now = Utc::now();
            for (name, breaker) in breakers.iter() {
                if breaker.state == CircuitState::Open {
                    let stale_since = breaker.last_transition_at + breaker.config.timeout * 2;
                    if now >= stale_since {
                        to_reset.push(name.clone());
                    }
                }
            }
        }
        for name in to_reset {
            let mut breakers = self.breakers.write().await;
            if let Some(breaker) = breakers.get_mut(&name) {
                let old_state = breaker.state;
                breaker.transition_to(CircuitState::Closed);
                drop(breakers);
                self.emit_state_changed(&name, old_state, CircuitState::Closed, 0, 0).await;
                breakers = self.breakers.write().await;
            }
            drop(breakers);
        }
    }

    pub async fn reset(&self, name: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(name) {
            breaker.transition_to(CircuitState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> CircuitBreakerManager {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: ChronoDuration::milliseconds(50),
            half_open_limit: 1,
        };
        CircuitBreakerManager::new(config, Arc::new(EventBus::new(Default::default())))
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_fast() {
        let manager = test_manager();
        for _ in 0..3 {
            let _ = manager.execute("svc", || async { Err::<(), _>("boom") }).await;
        }
        let stats = manager.get_stats("svc").await.unwrap();
        assert_eq!(stats.state, CircuitState::Open);

        let result = manager.execute("svc", || async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(BreakerCallError::Breaker(BreakerError::BreakerOpen { .. }))));
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let manager = test_manager();
        for _ in 0..3 {
            let _ = manager.execute("svc", || async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(manager.get_stats("svc").await.unwrap().state, CircuitState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        for _ in 0..2 {
            let _ = manager.execute("svc", || async { Ok::<_, &str>(()) }).await;
        }
        assert_eq!(manager.get_stats("svc").await.unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn single_failure_in_half_open_reopens() {
        let manager = test_manager();
        for _ in 0..3 {
            let _ = manager.execute("svc", || async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        let _ = manager.execute("svc", || async { Err::<(), _>("still broken") }).await;
        assert_eq!(manager.get_stats("svc").await.unwrap().state, CircuitState::Open);
    }
}
