//! Pipeline Entities
//!
//! Data carried through the blackboard between pipeline stages.
//! All entities serialize with serde so they can live in the shared state
//! store and in the on-disk caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Source Tree
// =============================================================================

/// A parsed source file. Created during parse; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    /// Path relative to the repository root
    pub path: String,
    /// Detected language identifier ("rust", "python", ...)
    pub language: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// Whether the file was classified as binary
    pub is_binary: bool,
    /// Short textual summary (first docstring / leading comment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Import targets extracted from the file
    #[serde(default)]
    pub imports: Vec<String>,
    /// Top-level declared symbols
    #[serde(default)]
    pub exported_symbols: Vec<String>,
}

/// Aggregated statistics for a prepared repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoStats {
    /// Total size of scanned files in bytes
    pub total_size: u64,
    /// Number of scanned files
    pub file_count: usize,
    /// Language -> file count
    pub language_breakdown: BTreeMap<String, usize>,
}

// =============================================================================
// History
// =============================================================================

/// One commit from the repository history. Ordered newest-first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub sha: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub insertions: usize,
    #[serde(default)]
    pub deletions: usize,
}

/// Derived view over the commit history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Author -> commit count
    pub contributions: BTreeMap<String, usize>,
    /// "YYYY-Qn" bucket -> commit count
    pub timeline_buckets: BTreeMap<String, usize>,
    /// Most-changed files, descending
    pub top_changed_files: Vec<(String, usize)>,
    /// LLM narrative of the history, if produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

// =============================================================================
// AI Analysis
// =============================================================================

/// A core module identified by the understanding stage.
/// Importance ranks in [1..10] drive detail-page prioritization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub path: String,
    pub description: String,
    pub importance: u8,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ModuleDescriptor {
    /// Clamp importance into its documented range
    pub fn normalized_importance(&self) -> u8 {
        self.importance.clamp(1, 10)
    }
}

// =============================================================================
// RAG
// =============================================================================

/// A bounded text fragment prepared for retrieval. Text phase only;
/// embeddings are a future extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    /// Start/end byte offsets into the source file
    pub byte_range: (usize, usize),
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// =============================================================================
// Errors and Findings
// =============================================================================

/// Severity of a recorded pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Fatal,
    Recoverable,
    Warning,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// An error recorded under `process_status.errors`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stage (node name) that produced the error
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub recovered: bool,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            retry_count: 0,
            recovered: false,
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn recovered(mut self) -> Self {
        self.recovered = true;
        self
    }
}

/// Severity of a Mermaid validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    Warning,
}

/// Result of validating one Mermaid block inside a generated document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    /// Document the chart lives in
    pub document_path: String,
    /// Zero-based index of the chart within the document
    pub chart_index: usize,
    /// The chart body as found
    pub chart_text: String,
    pub error_message: String,
    pub severity: FindingSeverity,
}

// =============================================================================
// Cache Metadata
// =============================================================================

/// Metadata stored next to a cached repository clone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoCacheMeta {
    pub url: String,
    pub branch: String,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_descriptor_importance_clamped() {
        let m = ModuleDescriptor {
            name: "core".into(),
            path: "src/core".into(),
            description: "engine".into(),
            importance: 42,
            depends_on: vec![],
        };
        assert_eq!(m.normalized_importance(), 10);
    }

    #[test]
    fn test_error_record_builder() {
        let rec = ErrorRecord::new("generate", ErrorKind::Recoverable, "rate limited")
            .with_retries(2)
            .recovered();
        assert_eq!(rec.retry_count, 2);
        assert!(rec.recovered);
        assert_eq!(rec.kind, ErrorKind::Recoverable);
    }

    #[test]
    fn test_file_entry_roundtrip() {
        let entry = FileEntry {
            path: "src/main.rs".into(),
            language: "rust".into(),
            size_bytes: 120,
            is_binary: false,
            summary: Some("entry point".into()),
            imports: vec!["clap".into()],
            exported_symbols: vec!["main".into()],
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: FileEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
