//! Circuit Breaker for Provider Resilience
//!
//! Prevents cascading failures when a provider is degraded. The circuit
//! opens when the failure rate over a sliding window of recent calls
//! crosses the threshold; open circuits short-circuit callers with
//! `ProviderDown` until a cool-down elapses and probe requests succeed.
//!
//! ## States
//!
//! - **Closed**: normal operation, requests flow through
//! - **Open**: provider is failing, requests are rejected immediately
//! - **HalfOpen**: testing if the provider has recovered
//!
//! ## Transitions
//!
//! ```text
//! Closed --[windowed failure rate over threshold]--> Open
//! Open --[cool-down elapsed]--> HalfOpen
//! HalfOpen --[success_threshold successes]--> Closed
//! HalfOpen --[failure]--> Open
//! ```

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::constants::circuit_breaker as cb_constants;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through
    Closed,
    /// Provider is failing - requests rejected immediately
    Open,
    /// Testing recovery - limited requests allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Sliding window size of recorded call outcomes
    pub window_size: usize,
    /// Failure rate over the window that opens the circuit
    pub failure_rate_threshold: f32,
    /// Minimum calls in the window before the rate is acted on
    pub min_calls: usize,
    /// Duration to wait before transitioning from open to half-open
    pub open_timeout: Duration,
    /// Maximum requests allowed in half-open state
    pub half_open_max_requests: u32,
    /// Consecutive successes in half-open needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: cb_constants::WINDOW_SIZE,
            failure_rate_threshold: cb_constants::FAILURE_RATE_THRESHOLD,
            min_calls: cb_constants::MIN_CALLS,
            open_timeout: Duration::from_secs(cb_constants::RECOVERY_TIMEOUT_SECS),
            half_open_max_requests: cb_constants::HALF_OPEN_MAX_REQUESTS,
            success_threshold: cb_constants::SUCCESS_THRESHOLD,
        }
    }
}

/// Unified internal state - all mutable state in a single struct
/// to ensure atomicity of state transitions
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    /// Recent call outcomes, true = failure
    window: VecDeque<bool>,
    success_count: u32,
    half_open_requests: u32,
    opened_at: Option<Instant>,
    blocked_count: u64,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            success_count: 0,
            half_open_requests: 0,
            opened_at: None,
            blocked_count: 0,
        }
    }

    fn record_outcome(&mut self, failed: bool, window_size: usize) {
        self.window.push_back(failed);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    fn failure_rate(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|f| **f).count();
        failures as f32 / self.window.len() as f32
    }
}

/// Thread-safe circuit breaker with windowed failure-rate tracking.
///
/// All state is protected by a single RwLock to ensure consistency
/// between the outcome window and state transitions.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    provider_name: String,
    inner: RwLock<CircuitBreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for a provider
    pub fn new(provider_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            provider_name: provider_name.into(),
            inner: RwLock::new(CircuitBreakerInner::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider_name: impl Into<String>) -> Self {
        Self::new(provider_name, CircuitBreakerConfig::default())
    }

    /// Get current circuit state (checking for timeout transitions)
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();

        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    /// Check if a request should be allowed.
    ///
    /// Returns `true` if the request can proceed, `false` if the circuit
    /// is open or the half-open probe budget is spent.
    pub fn allow_request(&self) -> bool {
        self.check_state_transition();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                inner.blocked_count += 1;
                tracing::debug!(
                    "Circuit breaker [{}]: request blocked (circuit OPEN)",
                    self.provider_name
                );
                false
            }
            CircuitState::HalfOpen => {
                if inner.half_open_requests < self.config.half_open_max_requests {
                    inner.half_open_requests += 1;
                    true
                } else {
                    inner.blocked_count += 1;
                    false
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.record_outcome(false, self.config.window_size);

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;

            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.half_open_requests = 0;
                inner.opened_at = None;
                inner.window.clear();

                tracing::info!(
                    "Circuit breaker [{}]: closed (provider recovered)",
                    self.provider_name
                );
            }
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.record_outcome(true, self.config.window_size);
        inner.success_count = 0;

        match inner.state {
            CircuitState::Closed => {
                let rate = inner.failure_rate();
                if inner.window.len() >= self.config.min_calls
                    && rate >= self.config.failure_rate_threshold
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_requests = 0;

                    tracing::warn!(
                        "Circuit breaker [{}]: opened at {:.0}% failure rate over {} calls \
                         (cool-down {:?})",
                        self.provider_name,
                        rate * 100.0,
                        inner.window.len(),
                        self.config.open_timeout
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open immediately re-opens the circuit
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_requests = 0;

                tracing::warn!(
                    "Circuit breaker [{}]: re-opened after failure in half-open state",
                    self.provider_name
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Count of requests rejected while open
    pub fn blocked_count(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .blocked_count
    }

    /// Check if state transition is needed (open -> half-open)
    fn check_state_transition(&self) {
        let should_transition = {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            inner.state == CircuitState::Open
                && inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false)
        };

        if should_transition {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            // Double-check state (may have changed between read and write)
            if inner.state == CircuitState::Open {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_requests = 0;
                inner.success_count = 0;

                tracing::info!(
                    "Circuit breaker [{}]: transitioning to HALF_OPEN (probing recovery)",
                    self.provider_name
                );
            }
        }
    }
}
