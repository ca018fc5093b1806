//! Node Lifecycle
//!
//! A node executes three phases:
//!
//! 1. `prepare(state)` - pull inputs from the blackboard, validate them,
//!    produce a local work descriptor. Failures are fatal for the node.
//! 2. `execute(prep)` - the actual work. All external I/O happens here.
//!    Re-entrant to support retries; never touches the blackboard.
//! 3. `post(state, prep, exec)` - write results back, return the action
//!    label selecting the next edge.
//!
//! Retries wrap `execute` only. After exhaustion the node's `fallback` hook
//! runs; the default re-raises, which records the error on the blackboard
//! and routes the flow along the `"error"` edge.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use super::state::SharedState;
use crate::types::{AtlasError, ErrorKind, ErrorRecord, Result};

// =============================================================================
// Actions
// =============================================================================

/// Action label returned by `post`, selecting the next edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action(String);

impl Action {
    pub const DEFAULT: &str = "default";
    pub const ERROR: &str = "error";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The reserved label used when a node has a single successor.
    pub fn default_label() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// The sentinel label emitted after fallback exhaustion.
    pub fn error_label() -> Self {
        Self(Self::ERROR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_error(&self) -> bool {
        self.0 == Self::ERROR
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff shape between execute retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

/// Retry configuration for a node's `execute` phase.
/// `max_retries` counts total attempts; 1 means no retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: Duration::from_secs(1),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self {
            max_retries,
            wait,
            backoff: Backoff::Exponential,
        }
    }

    pub fn linear(mut self) -> Self {
        self.backoff = Backoff::Linear;
        self
    }

    /// Delay before the given retry (1-based attempt that just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.wait.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.wait.saturating_mul(factor)
            }
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancel signal, checked between nodes and between batch items.
/// In-flight work is not forcibly killed; it observes the signal on
/// completion and its result is discarded.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out early when cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AtlasError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Node Trait
// =============================================================================

/// Unit of work with the prepare/execute/post lifecycle.
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable name, used for edges, logging, and per-node model overrides.
    fn name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Wall-clock cap applied to `execute` only.
    fn execute_timeout(&self) -> Option<Duration> {
        None
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value>;

    async fn execute(&self, prep: Value) -> Result<Value>;

    async fn post(&self, state: &SharedState, prep: Value, exec: Value) -> Result<Action>;

    /// Called after retry exhaustion with the final error.
    /// The default re-raises, which records the failure and routes `"error"`.
    async fn fallback(&self, _prep: Value, error: AtlasError) -> Result<Value> {
        Err(error)
    }
}

/// Shared handle to a node.
pub type SharedNode = Arc<dyn Node>;

// =============================================================================
// Lifecycle Runner
// =============================================================================

/// Run one node through its full lifecycle. This is the single lifecycle
/// implementation shared by every scheduler; runners differ only in how they
/// order calls to it.
pub async fn run_node(node: &dyn Node, state: &SharedState, cancel: &CancelToken) -> Result<Action> {
    run_node_locked(node, state, cancel, None).await
}

/// Lifecycle with an optional lock serializing the post phase. Parallel
/// runners pass a set-wide lock so concurrent members never write the
/// blackboard simultaneously.
pub async fn run_node_locked(
    node: &dyn Node,
    state: &SharedState,
    cancel: &CancelToken,
    post_lock: Option<&tokio::sync::Mutex<()>>,
) -> Result<Action> {
    cancel.check()?;

    debug!(node = node.name(), "prepare");
    let prep = match node.prepare(state).await {
        Ok(value) => value,
        Err(err) => {
            let kind = if err.is_recoverable() {
                ErrorKind::Recoverable
            } else {
                ErrorKind::Fatal
            };
            state.record_error(ErrorRecord::new(
                node.name(),
                kind,
                format!("prepare failed: {}", err),
            ));
            return Err(err);
        }
    };

    let policy = node.retry_policy();
    let mut attempt: u32 = 0;

    let exec = loop {
        attempt += 1;
        cancel.check()?;

        let result = match node.execute_timeout() {
            Some(limit) => match tokio::time::timeout(limit, node.execute(prep.clone())).await {
                Ok(inner) => inner,
                Err(_) => Err(AtlasError::timeout(node.name(), limit)),
            },
            None => node.execute(prep.clone()).await,
        };

        match result {
            Ok(value) => {
                if cancel.is_cancelled() {
                    // Completed after cancellation; discard the result.
                    return Err(AtlasError::Cancelled);
                }
                break value;
            }
            Err(AtlasError::Cancelled) => return Err(AtlasError::Cancelled),
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    node = node.name(),
                    attempt,
                    max = policy.max_retries,
                    error = %err,
                    "execute failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                debug!(node = node.name(), error = %err, "retries exhausted, invoking fallback");
                match node.fallback(prep.clone(), err).await {
                    Ok(value) => {
                        let _guard = match post_lock {
                            Some(lock) => Some(lock.lock().await),
                            None => None,
                        };
                        state.record_error(
                            ErrorRecord::new(
                                node.name(),
                                ErrorKind::Recoverable,
                                "execute failed; fallback value used",
                            )
                            .with_retries(attempt)
                            .recovered(),
                        );
                        break value;
                    }
                    Err(final_err) => {
                        let kind = if final_err.is_recoverable() {
                            ErrorKind::Recoverable
                        } else {
                            ErrorKind::Fatal
                        };
                        let _guard = match post_lock {
                            Some(lock) => Some(lock.lock().await),
                            None => None,
                        };
                        state.record_error(
                            ErrorRecord::new(node.name(), kind, final_err.to_string())
                                .with_retries(attempt),
                        );
                        return Ok(Action::error_label());
                    }
                }
            }
        }
    };

    let _guard = match post_lock {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };
    node.post(state, prep, exec).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyNode {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Node for FlakyNode {
        fn name(&self) -> &str {
            "flaky"
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(3, Duration::from_millis(1))
        }

        async fn prepare(&self, _state: &SharedState) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn execute(&self, _prep: Value) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(AtlasError::node_recoverable("flaky", "transient"))
            } else {
                Ok(Value::from(n + 1))
            }
        }

        async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
            state.set("flaky.attempts", exec);
            Ok(Action::default_label())
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let node = FlakyNode {
            fail_times: 2,
            calls: AtomicU32::new(0),
        };
        let state = SharedState::new();
        let action = run_node(&node, &state, &CancelToken::new()).await.unwrap();
        assert_eq!(action, Action::default_label());
        // Two failures then success on attempt 3
        assert_eq!(state.get::<u32>("flaky.attempts").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_routes_error_and_records() {
        let node = FlakyNode {
            fail_times: 10,
            calls: AtomicU32::new(0),
        };
        let state = SharedState::new();
        let action = run_node(&node, &state, &CancelToken::new()).await.unwrap();
        assert!(action.is_error());
        let errors = state.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "flaky");
        assert_eq!(errors[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let node = FlakyNode {
            fail_times: 0,
            calls: AtomicU32::new(0),
        };
        let state = SharedState::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_node(&node, &state, &cancel).await.unwrap_err();
        assert!(matches!(err, AtlasError::Cancelled));
        assert_eq!(node.calls.load(Ordering::SeqCst), 0);
    }

    struct SlowNode;

    #[async_trait]
    impl Node for SlowNode {
        fn name(&self) -> &str {
            "slow"
        }

        fn execute_timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(10))
        }

        async fn prepare(&self, _state: &SharedState) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn execute(&self, _prep: Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }

        async fn post(&self, _state: &SharedState, _prep: Value, _exec: Value) -> Result<Action> {
            Ok(Action::default_label())
        }
    }

    #[tokio::test]
    async fn test_execute_timeout_routes_error() {
        let state = SharedState::new();
        let action = run_node(&SlowNode, &state, &CancelToken::new())
            .await
            .unwrap();
        assert!(action.is_error());
        assert!(state.errors()[0].message.contains("Timeout"));
    }

    #[test]
    fn test_backoff_shapes() {
        let linear = RetryPolicy::new(3, Duration::from_secs(2)).linear();
        assert_eq!(linear.delay_for(1), Duration::from_secs(2));
        assert_eq!(linear.delay_for(3), Duration::from_secs(6));

        let expo = RetryPolicy::new(3, Duration::from_secs(2));
        assert_eq!(expo.delay_for(1), Duration::from_secs(2));
        assert_eq!(expo.delay_for(3), Duration::from_secs(8));
    }
}
