//! CodeAtlas - AI-Driven Knowledge Documents for Git Repositories
//!
//! Analyzes a repository and produces a structured, multi-file knowledge
//! document: architecture overview, API reference, dependency map,
//! glossary, evolution timeline, quick-look, and per-module detail pages.
//!
//! ## Core Pieces
//!
//! - **Dataflow Engine**: prepare/execute/post nodes, labeled transitions,
//!   nested flows, bounded parallel fan-out and batches
//! - **Blackboard**: the shared state store nodes exchange artifacts through
//! - **LLM Call Layer**: provider-agnostic generation with retry, fallback
//!   chains, circuit breakers, disk caching, and token budgeting
//! - **Repository Analysis**: clone-with-cache, history analysis, source
//!   parsing, dependency graph, RAG chunking
//! - **Mermaid Validation**: rule-based chart checks with LLM-assisted
//!   repair of invalid diagrams
//!
//! ## Quick Start
//!
//! ```ignore
//! use codeatlas::{Config, LlmClient, Pipeline, RunOptions};
//! use std::sync::Arc;
//!
//! let config = Arc::new(Config::default());
//! let client = Arc::new(LlmClient::new(Arc::clone(&config)));
//! let pipeline = Pipeline::new(config, client);
//! let outcome = pipeline.run(RunOptions {
//!     repo_source: "https://github.com/acme/widget.git".into(),
//!     target_language: "en".into(),
//!     output_dir: "docs".into(),
//! }).await?;
//! ```
//!
//! ## Modules
//!
//! - [`flow`]: the dataflow engine and shared state store
//! - [`llm`]: the LLM call layer
//! - [`repo`]: repository fetch and history analysis
//! - [`analyzer`]: source scanning, parsing, and chunking
//! - [`mermaid`]: Mermaid extraction, validation, and repair
//! - [`pipeline`]: the documentation nodes and top-level flow
//! - [`config`]: layered configuration

pub mod analyzer;
pub mod config;
pub mod constants;
pub mod flow;
pub mod llm;
pub mod mermaid;
pub mod pipeline;
pub mod repo;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::{AtlasError, ErrorCategory, ErrorClassifier, LlmError, Result};

// Engine
pub use flow::{
    Action, BatchNode, BatchRunner, CancelToken, ExecutionMode, Flow, FlowBuilder, Node,
    ParallelSet, RetryPolicy, SharedState,
};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{Pipeline, PipelineOutcome, RunOptions, RunReport};

// =============================================================================
// LLM Re-exports
// =============================================================================

pub use llm::{
    GenerateRequest, Generation, GenerationMeta, LlmClient, LlmProvider, ModelRef, TaskType,
    TokenCounter, UsageTotals,
};
