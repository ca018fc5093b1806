//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// LLM retry and fallback constants
pub mod llm {
    /// Maximum total attempts across primary and fallback models
    pub const MAX_TOTAL_ATTEMPTS: usize = 10;

    /// Default maximum retries per model
    pub const DEFAULT_RETRY_COUNT: u8 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Temperature for analytical tasks (summarize, explain, analyze)
    pub const ANALYTICAL_TEMPERATURE: f32 = 0.2;

    /// Temperature for creative tasks (content generation)
    pub const CREATIVE_TEMPERATURE: f32 = 0.7;

    /// Minimum acceptable response length (characters)
    pub const MIN_RESPONSE_LENGTH: usize = 20;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Size of the sliding window of recorded call outcomes
    pub const WINDOW_SIZE: usize = 20;

    /// Failure rate over the window that opens the circuit
    pub const FAILURE_RATE_THRESHOLD: f32 = 0.5;

    /// Minimum calls in the window before the rate is meaningful
    pub const MIN_CALLS: usize = 5;

    /// Duration to wait before attempting recovery (seconds)
    pub const RECOVERY_TIMEOUT_SECS: u64 = 30;

    /// Maximum requests allowed in half-open state
    pub const HALF_OPEN_MAX_REQUESTS: u32 = 3;

    /// Success threshold to close circuit from half-open
    pub const SUCCESS_THRESHOLD: u32 = 2;
}

/// Cache constants
pub mod cache {
    /// Default LLM cache TTL (seconds)
    pub const LLM_TTL_SECS: u64 = 86_400;

    /// Default repository cache TTL (seconds)
    pub const REPO_TTL_SECS: u64 = 86_400;
}

/// Flow engine constants
pub mod flow {
    /// Default worker pool width for parallel stages
    pub const MAX_WORKERS: usize = 8;

    /// Default bound on concurrent LLM calls
    pub const MAX_CONCURRENT_LLM_CALLS: usize = 4;

    /// Default per-node execute timeout (seconds)
    pub const NODE_TIMEOUT_SECS: u64 = 600;

    /// Default semaphore width for parallel batch nodes
    pub const BATCH_CONCURRENCY: usize = 8;
}

/// Repository analysis constants
pub mod repo {
    /// Maximum repository size to analyze (bytes)
    pub const MAX_REPO_SIZE: u64 = 500 * 1024 * 1024;

    /// Maximum commits read from history
    pub const MAX_COMMITS: usize = 500;

    /// Most-changed files reported from history
    pub const TOP_CHANGED_FILES: usize = 10;
}

/// Source parsing constants
pub mod parse {
    /// Files per parse batch
    pub const BATCH_SIZE: usize = 150;

    /// Maximum files scanned from the working tree
    pub const MAX_FILES: usize = 10_000;

    /// Maximum file size to parse (bytes)
    pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

    /// RAG chunk size (characters)
    pub const CHUNK_SIZE: usize = 1_000;

    /// RAG chunk overlap (characters)
    pub const CHUNK_OVERLAP: usize = 200;
}

/// Quality gate constants
pub mod quality {
    /// Overall score threshold below which regeneration kicks in
    pub const OVERALL_THRESHOLD: f32 = 0.7;

    /// Maximum regeneration attempts per section
    pub const MAX_REGENERATION_ATTEMPTS: u8 = 2;

    /// Quality recorded for degraded structure-only analysis
    pub const DEGRADED_SCORE: f32 = 0.4;

    /// Maximum modules per detail batch
    pub const MAX_MODULES_PER_BATCH: usize = 16;
}

/// Mermaid validation constants
pub mod mermaid {
    /// Maximum regeneration attempts per invalid chart
    pub const MAX_REGENERATION_ATTEMPTS: u8 = 2;

    /// Chart types accepted by the rule validator
    pub const SUPPORTED_CHART_TYPES: &[&str] = &[
        "graph",
        "flowchart",
        "sequenceDiagram",
        "classDiagram",
        "stateDiagram",
        "pie",
        "timeline",
        "gitGraph",
        "mindmap",
        "erDiagram",
    ];
}
