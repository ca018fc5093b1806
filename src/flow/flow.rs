//! Flows
//!
//! A flow is a graph of nodes with labeled edges. It is itself a node, so
//! flows nest: the analysis stage and the generation stage are sub-flows of
//! the top-level pipeline.
//!
//! Edges are looked up by the action label returned from `post`; a label
//! with no edge terminates the flow at that node.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::node::{Action, CancelToken, Node, SharedNode, run_node, run_node_locked};
use super::state::SharedState;
use crate::types::{AtlasError, Result};

/// Scheduling model for fan-out stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One node at a time; deterministic reference semantics.
    Sequential,
    /// Single-threaded interleaving at await points.
    Async,
    /// Bounded worker pool.
    #[default]
    Parallel,
}

// =============================================================================
// Flow
// =============================================================================

/// A graph of nodes with labeled transitions.
pub struct Flow {
    name: String,
    start: String,
    nodes: HashMap<String, SharedNode>,
    /// (node name, action label) -> successor node name
    edges: HashMap<(String, String), String>,
    cancel: CancelToken,
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the flow to termination, returning the final action label.
    pub async fn run(&self, state: &SharedState) -> Result<Action> {
        let mut current = self.start.clone();
        info!(flow = %self.name, start = %current, "flow started");

        loop {
            self.cancel.check()?;

            let node = self.nodes.get(&current).ok_or_else(|| {
                AtlasError::node(&self.name, format!("unknown node '{}'", current))
            })?;

            let action = run_node(node.as_ref(), state, &self.cancel).await?;
            debug!(flow = %self.name, node = %current, action = %action, "node finished");

            match self
                .edges
                .get(&(current.clone(), action.as_str().to_string()))
            {
                Some(next) => current = next.clone(),
                None => {
                    if action.is_error() {
                        warn!(flow = %self.name, node = %current, "terminated on unrouted error");
                    }
                    info!(flow = %self.name, last = %current, "flow finished");
                    return Ok(action);
                }
            }
        }
    }
}

#[async_trait]
impl Node for Flow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _state: &SharedState) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn execute(&self, _prep: Value) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn post(&self, state: &SharedState, _prep: Value, _exec: Value) -> Result<Action> {
        self.run(state).await
    }
}

// =============================================================================
// Flow Builder
// =============================================================================

/// Builder for flows. The first node added becomes the start unless
/// overridden with `start`.
pub struct FlowBuilder {
    name: String,
    start: Option<String>,
    nodes: HashMap<String, SharedNode>,
    edges: HashMap<(String, String), String>,
    cancel: CancelToken,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn node(mut self, node: SharedNode) -> Self {
        if self.start.is_none() {
            self.start = Some(node.name().to_string());
        }
        self.nodes.insert(node.name().to_string(), node);
        self
    }

    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Default edge: `from >> to`.
    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge_on(from, Action::DEFAULT, to)
    }

    /// Labeled edge: `from.on(label) >> to`.
    pub fn edge_on(
        mut self,
        from: impl Into<String>,
        label: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.edges
            .insert((from.into(), label.into()), to.into());
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<Flow> {
        let start = self
            .start
            .ok_or_else(|| AtlasError::Config(format!("flow '{}' has no start node", self.name)))?;
        if !self.nodes.contains_key(&start) {
            return Err(AtlasError::Config(format!(
                "flow '{}' start node '{}' was never added",
                self.name, start
            )));
        }
        for ((from, _), to) in &self.edges {
            if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
                return Err(AtlasError::Config(format!(
                    "flow '{}' has an edge referencing unknown node ('{}' -> '{}')",
                    self.name, from, to
                )));
            }
        }
        Ok(Flow {
            name: self.name,
            start,
            nodes: self.nodes,
            edges: self.edges,
            cancel: self.cancel,
        })
    }
}

// =============================================================================
// Parallel Set
// =============================================================================

/// A fan-out stage: a set of independent nodes run under one scheduler.
/// Sequential mode is a refinement of parallel mode - same lifecycle calls,
/// same outputs, different interleaving. One node's failure is recorded and
/// does not stop its siblings.
pub struct ParallelSet {
    name: String,
    nodes: Vec<SharedNode>,
    mode: ExecutionMode,
    max_workers: usize,
    cancel: CancelToken,
}

impl ParallelSet {
    pub fn new(name: impl Into<String>, nodes: Vec<SharedNode>) -> Self {
        Self {
            name: name.into(),
            nodes,
            mode: ExecutionMode::Parallel,
            max_workers: crate::constants::flow::MAX_WORKERS,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn run_sequential(&self, state: &SharedState) -> Result<()> {
        for node in &self.nodes {
            self.cancel.check()?;
            match run_node(node.as_ref(), state, &self.cancel).await {
                Ok(action) if action.is_error() => {
                    warn!(set = %self.name, node = node.name(), "member failed; continuing");
                }
                Ok(_) => {}
                Err(AtlasError::Cancelled) => return Err(AtlasError::Cancelled),
                // A member that cannot even prepare was already recorded;
                // its siblings still run.
                Err(err) => {
                    warn!(set = %self.name, node = node.name(), error = %err, "member failed; continuing");
                }
            }
        }
        Ok(())
    }

    async fn run_parallel(&self, state: &SharedState) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        // The runner serializes post per node: members park here before
        // their post phase writes to the blackboard.
        let post_lock = Arc::new(Mutex::new(()));

        let mut tasks = FuturesUnordered::new();
        for node in self.nodes.iter().cloned() {
            let state = state.clone();
            let cancel = self.cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let post_lock = Arc::clone(&post_lock);
            let set_name = self.name.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result =
                    run_node_locked(node.as_ref(), &state, &cancel, Some(&*post_lock)).await;
                if let Ok(action) = &result
                    && action.is_error()
                {
                    warn!(set = %set_name, node = node.name(), "member failed; continuing");
                }
                result
            }));
        }

        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(AtlasError::Cancelled)) => return Err(AtlasError::Cancelled),
                // Recorded by the lifecycle already; siblings keep running.
                Ok(Err(err)) => {
                    warn!(set = %self.name, error = %err, "member failed; continuing");
                }
                Err(join_err) => {
                    return Err(AtlasError::node(&self.name, join_err.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Node for ParallelSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _state: &SharedState) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn execute(&self, _prep: Value) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn post(&self, state: &SharedState, _prep: Value, _exec: Value) -> Result<Action> {
        match self.mode {
            ExecutionMode::Sequential => self.run_sequential(state).await?,
            // Cooperative async shares the parallel driver with one worker:
            // members interleave at await points only.
            ExecutionMode::Async => {
                let narrowed = ParallelSet {
                    name: self.name.clone(),
                    nodes: self.nodes.clone(),
                    mode: ExecutionMode::Parallel,
                    max_workers: 1,
                    cancel: self.cancel.clone(),
                };
                narrowed.run_parallel(state).await?
            }
            ExecutionMode::Parallel => self.run_parallel(state).await?,
        }
        Ok(Action::default_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::node::RetryPolicy;
    use std::time::Duration;

    struct SetterNode {
        name: String,
        key: String,
        value: String,
        delay_ms: u64,
    }

    #[async_trait]
    impl Node for SetterNode {
        fn name(&self) -> &str {
            &self.name
        }

        async fn prepare(&self, _state: &SharedState) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn execute(&self, _prep: Value) -> Result<Value> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(Value::String(self.value.clone()))
        }

        async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
            state.set(&self.key, exec);
            Ok(Action::default_label())
        }
    }

    fn setter(name: &str, key: &str, value: &str) -> SharedNode {
        Arc::new(SetterNode {
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            delay_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_flow_runs_in_edge_order() {
        let flow = Flow::builder("test")
            .node(setter("a", "out.a", "1"))
            .node(setter("b", "out.b", "2"))
            .node(setter("c", "out.c", "3"))
            .edge("a", "b")
            .edge("b", "c")
            .build()
            .unwrap();

        let state = SharedState::new();
        let action = flow.run(&state).await.unwrap();
        assert_eq!(action, Action::default_label());
        assert_eq!(state.get_str("out.a").unwrap(), "1");
        assert_eq!(state.get_str("out.c").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_missing_label_terminates() {
        let flow = Flow::builder("test")
            .node(setter("a", "out.a", "1"))
            .node(setter("b", "out.b", "2"))
            // No edge from "a"; flow stops there.
            .build()
            .unwrap();

        let state = SharedState::new();
        flow.run(&state).await.unwrap();
        assert!(state.contains("out.a"));
        assert!(!state.contains("out.b"));
    }

    struct FailingNode;

    #[async_trait]
    impl Node for FailingNode {
        fn name(&self) -> &str {
            "failing"
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(1, Duration::from_millis(1))
        }

        async fn prepare(&self, _state: &SharedState) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn execute(&self, _prep: Value) -> Result<Value> {
            Err(AtlasError::node_recoverable("failing", "boom"))
        }

        async fn post(&self, _state: &SharedState, _prep: Value, _exec: Value) -> Result<Action> {
            Ok(Action::default_label())
        }
    }

    #[tokio::test]
    async fn test_error_label_routes_to_recovery_node() {
        let flow = Flow::builder("test")
            .node(Arc::new(FailingNode))
            .node(setter("recover", "out.recovered", "yes"))
            .start("failing")
            .edge_on("failing", Action::ERROR, "recover")
            .build()
            .unwrap();

        let state = SharedState::new();
        flow.run(&state).await.unwrap();
        assert_eq!(state.get_str("out.recovered").unwrap(), "yes");
        assert!(!state.errors().is_empty());
    }

    #[tokio::test]
    async fn test_nested_flow_is_a_node() {
        let inner = Flow::builder("inner")
            .node(setter("x", "out.inner", "done"))
            .build()
            .unwrap();

        let outer = Flow::builder("outer")
            .node(Arc::new(inner) as SharedNode)
            .node(setter("after", "out.after", "done"))
            .start("inner")
            .edge("inner", "after")
            .build()
            .unwrap();

        let state = SharedState::new();
        outer.run(&state).await.unwrap();
        assert_eq!(state.get_str("out.inner").unwrap(), "done");
        assert_eq!(state.get_str("out.after").unwrap(), "done");
    }

    #[tokio::test]
    async fn test_parallel_set_runs_all_members() {
        let nodes: Vec<SharedNode> = (0..6)
            .map(|i| {
                Arc::new(SetterNode {
                    name: format!("n{}", i),
                    key: format!("out.n{}", i),
                    value: i.to_string(),
                    delay_ms: (6 - i as u64) * 5,
                }) as SharedNode
            })
            .collect();

        let set = ParallelSet::new("generators", nodes).with_max_workers(3);
        let state = SharedState::new();
        let action = run_node(&set, &state, &CancelToken::new()).await.unwrap();
        assert_eq!(action, Action::default_label());
        for i in 0..6 {
            assert_eq!(state.get_str(&format!("out.n{}", i)).unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_sequential_refines_parallel() {
        // Same members, both modes: identical blackboard contents.
        let build_nodes = || -> Vec<SharedNode> {
            (0..4)
                .map(|i| {
                    Arc::new(SetterNode {
                        name: format!("n{}", i),
                        key: format!("out.n{}", i),
                        value: format!("v{}", i),
                        delay_ms: 0,
                    }) as SharedNode
                })
                .collect()
        };

        let seq_state = SharedState::new();
        let seq = ParallelSet::new("set", build_nodes()).with_mode(ExecutionMode::Sequential);
        run_node(&seq, &seq_state, &CancelToken::new()).await.unwrap();

        let par_state = SharedState::new();
        let par = ParallelSet::new("set", build_nodes()).with_mode(ExecutionMode::Parallel);
        run_node(&par, &par_state, &CancelToken::new()).await.unwrap();

        assert_eq!(seq_state.snapshot(), par_state.snapshot());
    }

    #[tokio::test]
    async fn test_parallel_set_survives_member_failure() {
        let nodes: Vec<SharedNode> = vec![
            Arc::new(FailingNode) as SharedNode,
            setter("ok", "out.ok", "fine"),
        ];
        let set = ParallelSet::new("mixed", nodes);
        let state = SharedState::new();
        let action = run_node(&set, &state, &CancelToken::new()).await.unwrap();
        assert_eq!(action, Action::default_label());
        assert_eq!(state.get_str("out.ok").unwrap(), "fine");
        assert!(!state.errors().is_empty());
    }
}
