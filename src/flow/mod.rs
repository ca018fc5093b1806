//! Dataflow Engine
//!
//! Nodes with a prepare/execute/post lifecycle, composed into flows with
//! labeled transitions. Flows nest; fan-out runs on a bounded worker pool.
//! Data moves through the [`SharedState`] blackboard, control moves through
//! action labels.

mod batch;
#[allow(clippy::module_inception)]
mod flow;
mod node;
mod state;

pub use batch::{BatchNode, BatchRunner};
pub use flow::{ExecutionMode, Flow, FlowBuilder, ParallelSet};
pub use node::{
    Action, Backoff, CancelToken, Node, RetryPolicy, SharedNode, run_node, run_node_locked,
};
pub use state::{SharedState, keys};
