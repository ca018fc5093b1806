//! Batch Nodes
//!
//! A batch node takes a list from `prepare_batch` and invokes `execute_one`
//! per item, either sequentially or on a bounded worker pool. Results are
//! collected in submission order regardless of completion order. A single
//! item's failure is recorded but does not abort the batch unless
//! `fail_fast` is set.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::node::{Action, CancelToken, Node, RetryPolicy};
use super::state::SharedState;
use crate::constants;
use crate::types::{AtlasError, ErrorKind, ErrorRecord, Result};

// =============================================================================
// Batch Trait
// =============================================================================

/// Per-item work over a list pulled from the blackboard.
#[async_trait]
pub trait BatchNode: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Semaphore width for the parallel driver.
    fn concurrency(&self) -> usize {
        constants::flow::BATCH_CONCURRENCY
    }

    /// Abort the whole batch on the first item failure.
    fn fail_fast(&self) -> bool {
        false
    }

    fn item_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Pull the item list from the blackboard.
    async fn prepare_batch(&self, state: &SharedState) -> Result<Vec<Value>>;

    /// Process one item. Must be re-entrant to support retries.
    async fn execute_one(&self, item: Value) -> Result<Value>;

    /// Called when an item exhausts its retries. The default re-raises,
    /// which records the failure and leaves a null slot in the results.
    async fn fallback_one(&self, _item: Value, error: AtlasError) -> Result<Value> {
        Err(error)
    }

    /// Write the collected results back. `results[i]` corresponds to
    /// `items[i]`; failed items are `Value::Null`.
    async fn post_batch(
        &self,
        state: &SharedState,
        items: Vec<Value>,
        results: Vec<Value>,
    ) -> Result<Action>;
}

// =============================================================================
// Batch Runner
// =============================================================================

/// Adapter exposing a [`BatchNode`] as a regular flow [`Node`].
pub struct BatchRunner<B: BatchNode> {
    inner: Arc<B>,
    parallel: bool,
    cancel: CancelToken,
}

impl<B: BatchNode> BatchRunner<B> {
    pub fn sequential(inner: B) -> Self {
        Self {
            inner: Arc::new(inner),
            parallel: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn parallel(inner: B) -> Self {
        Self {
            inner: Arc::new(inner),
            parallel: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn run_one(inner: &B, item: Value) -> std::result::Result<Value, String> {
        let policy = inner.item_retry_policy();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match inner.execute_one(item.clone()).await {
                Ok(value) => return Ok(value),
                Err(AtlasError::Cancelled) => return Err("cancelled".to_string()),
                Err(err) if attempt < policy.max_retries => {
                    debug!(
                        batch = inner.name(),
                        attempt,
                        error = %err,
                        "item failed, retrying"
                    );
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                Err(err) => {
                    return match inner.fallback_one(item, err).await {
                        Ok(value) => Ok(value),
                        Err(final_err) => Err(final_err.to_string()),
                    };
                }
            }
        }
    }

    async fn execute_sequential(&self, items: Vec<Value>) -> Result<Value> {
        let mut results = Vec::with_capacity(items.len());
        let mut errors = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            self.cancel.check()?;
            match Self::run_one(&self.inner, item).await {
                Ok(value) => results.push(value),
                Err(message) => {
                    if self.inner.fail_fast() {
                        return Err(AtlasError::node(self.inner.name(), message));
                    }
                    errors.push(json!({ "index": index, "message": message }));
                    results.push(Value::Null);
                }
            }
        }

        Ok(json!({ "results": results, "errors": errors }))
    }

    async fn execute_parallel(&self, items: Vec<Value>) -> Result<Value> {
        let semaphore = Arc::new(Semaphore::new(self.inner.concurrency().max(1)));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                if cancel.is_cancelled() {
                    return Err("cancelled".to_string());
                }
                Self::run_one(&inner, item).await
            }));
        }

        // Awaiting handles in submission order preserves input order in the
        // results even though items complete out of order.
        let mut results = Vec::with_capacity(handles.len());
        let mut errors = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(message)) => {
                    if message == "cancelled" {
                        return Err(AtlasError::Cancelled);
                    }
                    if self.inner.fail_fast() {
                        return Err(AtlasError::node(self.inner.name(), message));
                    }
                    errors.push(json!({ "index": index, "message": message }));
                    results.push(Value::Null);
                }
                Err(join_err) => {
                    errors.push(json!({ "index": index, "message": join_err.to_string() }));
                    results.push(Value::Null);
                }
            }
        }

        Ok(json!({ "results": results, "errors": errors }))
    }
}

#[async_trait]
impl<B: BatchNode> Node for BatchRunner<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        Ok(Value::Array(self.inner.prepare_batch(state).await?))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let items = match prep {
            Value::Array(items) => items,
            other => {
                return Err(AtlasError::node(
                    self.inner.name(),
                    format!("batch prepare produced non-list: {}", other),
                ));
            }
        };

        if self.parallel {
            self.execute_parallel(items).await
        } else {
            self.execute_sequential(items).await
        }
    }

    async fn post(&self, state: &SharedState, prep: Value, exec: Value) -> Result<Action> {
        let items = prep.as_array().cloned().unwrap_or_default();
        let results = exec["results"].as_array().cloned().unwrap_or_default();

        if let Some(errors) = exec["errors"].as_array() {
            for error in errors {
                let message = error["message"].as_str().unwrap_or("unknown");
                let index = error["index"].as_u64().unwrap_or(0);
                warn!(batch = self.inner.name(), index, message, "batch item failed");
                state.record_error(ErrorRecord::new(
                    self.inner.name(),
                    ErrorKind::Recoverable,
                    format!("item {} failed: {}", index, message),
                ));
            }
        }

        self.inner.post_batch(state, items, results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::node::run_node;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct DoublerBatch {
        fail_on: Option<i64>,
        fail_fast: bool,
        post_writes: AtomicU32,
    }

    impl DoublerBatch {
        fn new(fail_on: Option<i64>, fail_fast: bool) -> Self {
            Self {
                fail_on,
                fail_fast,
                post_writes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchNode for DoublerBatch {
        fn name(&self) -> &str {
            "doubler"
        }

        fn concurrency(&self) -> usize {
            4
        }

        fn fail_fast(&self) -> bool {
            self.fail_fast
        }

        fn item_retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(1, Duration::from_millis(1))
        }

        async fn prepare_batch(&self, state: &SharedState) -> Result<Vec<Value>> {
            Ok(state
                .get::<Vec<i64>>("batch.input")
                .unwrap_or_default()
                .into_iter()
                .map(Value::from)
                .collect())
        }

        async fn execute_one(&self, item: Value) -> Result<Value> {
            let n = item.as_i64().unwrap_or(0);
            // Vary completion order so order preservation is actually tested.
            tokio::time::sleep(Duration::from_millis((10 - n as u64 % 10) * 2)).await;
            if Some(n) == self.fail_on {
                return Err(AtlasError::node_recoverable("doubler", "bad item"));
            }
            Ok(Value::from(n * 2))
        }

        async fn post_batch(
            &self,
            state: &SharedState,
            _items: Vec<Value>,
            results: Vec<Value>,
        ) -> Result<Action> {
            self.post_writes.fetch_add(1, Ordering::SeqCst);
            state.set("batch.output", results);
            Ok(Action::default_label())
        }
    }

    #[tokio::test]
    async fn test_parallel_batch_preserves_order() {
        let state = SharedState::new();
        state.set("batch.input", (0..8).collect::<Vec<i64>>());

        let runner = BatchRunner::parallel(DoublerBatch::new(None, false));
        run_node(&runner, &state, &CancelToken::new()).await.unwrap();

        let output: Vec<i64> = state.get("batch.output").unwrap();
        assert_eq!(output, (0..8).map(|n| n * 2).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_single_failure_leaves_null_slot() {
        let state = SharedState::new();
        state.set("batch.input", vec![1i64, 2, 3]);

        let runner = BatchRunner::parallel(DoublerBatch::new(Some(2), false));
        run_node(&runner, &state, &CancelToken::new()).await.unwrap();

        let output: Vec<Value> = state.get("batch.output").unwrap();
        assert_eq!(output[0], Value::from(2));
        assert_eq!(output[1], Value::Null);
        assert_eq!(output[2], Value::from(6));

        let errors = state.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("item 1"));
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_batch() {
        let state = SharedState::new();
        state.set("batch.input", vec![1i64, 2, 3]);

        let runner = BatchRunner::sequential(DoublerBatch::new(Some(2), true));
        let action = run_node(&runner, &state, &CancelToken::new()).await.unwrap();
        assert!(action.is_error());
        assert!(!state.contains("batch.output"));
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let seq_state = SharedState::new();
        seq_state.set("batch.input", (0..6).collect::<Vec<i64>>());
        let seq = BatchRunner::sequential(DoublerBatch::new(None, false));
        run_node(&seq, &seq_state, &CancelToken::new()).await.unwrap();

        let par_state = SharedState::new();
        par_state.set("batch.input", (0..6).collect::<Vec<i64>>());
        let par = BatchRunner::parallel(DoublerBatch::new(None, false));
        run_node(&par, &par_state, &CancelToken::new()).await.unwrap();

        assert_eq!(
            seq_state.get_value("batch.output"),
            par_state.get_value("batch.output")
        );
    }

    #[tokio::test]
    async fn test_exactly_one_post_write() {
        let state = SharedState::new();
        state.set("batch.input", (0..5).collect::<Vec<i64>>());

        let batch = DoublerBatch::new(None, false);
        let runner = BatchRunner::parallel(batch);
        run_node(&runner, &state, &CancelToken::new()).await.unwrap();
        assert_eq!(runner.inner.post_writes.load(Ordering::SeqCst), 1);
    }
}
