//! Shared Types
//!
//! Error system and blackboard entities used across the pipeline.

pub mod entities;
pub mod error;

pub use entities::{
    Chunk, CommitRecord, ErrorKind, ErrorRecord, FileEntry, FindingSeverity, HistorySummary,
    ModuleDescriptor, RepoCacheMeta, RepoStats, ValidationFinding,
};
pub use error::{AtlasError, ErrorCategory, ErrorClassifier, LlmError, Result};
