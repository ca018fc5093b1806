//! Parse Code Batch Node
//!
//! Scans the working tree, parses files in parallel batches, and publishes
//! the code structure plus the aggregated module dependency graph. Binary
//! and unknown-language files are recorded as skips, not errors.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::analyzer::{
    DependencyGraph, FileScanner, module_of_path, parse_file,
};
use crate::config::ParseConfig;
use crate::flow::{Action, BatchNode, SharedState, keys};
use crate::types::{AtlasError, ErrorKind, ErrorRecord, FileEntry, Result};

pub struct ParseCodeBatch {
    config: ParseConfig,
}

impl ParseCodeBatch {
    pub fn new(config: ParseConfig) -> Self {
        Self { config }
    }

    /// Derive module-level dependency edges from per-file imports.
    fn build_dependency_graph(entries: &[FileEntry]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();

        for entry in entries {
            if !entry.is_binary {
                graph.add_module(&module_of_path(&entry.path));
            }
        }

        for entry in entries {
            if entry.is_binary {
                continue;
            }
            let from = module_of_path(&entry.path);
            for import in &entry.imports {
                // Normalize an import target to a candidate module name:
                // first path/namespace segment, relative prefixes dropped.
                let target = import
                    .trim_start_matches("./")
                    .trim_start_matches("../")
                    .split(['/', '.', ':'])
                    .find(|s| !s.is_empty())
                    .unwrap_or(import);
                if target != from {
                    graph.add_edge_known(&from, target);
                }
            }
        }

        graph.annotate_cycles();
        graph
    }
}

#[async_trait]
impl BatchNode for ParseCodeBatch {
    fn name(&self) -> &str {
        "parse_code"
    }

    async fn prepare_batch(&self, state: &SharedState) -> Result<Vec<Value>> {
        let root: PathBuf = state
            .get(keys::LOCAL_REPO_PATH)
            .ok_or_else(|| AtlasError::Repo("local_repo_path missing from state".into()))?;

        let scanner = FileScanner::new(self.config.clone());
        let files = scanner.scan(&root)?;
        info!(files = files.len(), "scan complete, batching for parse");

        // Each batch item is a slice of files parsed by one worker
        let items = files
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| {
                let batch: Vec<Value> = chunk
                    .iter()
                    .map(|f| {
                        json!({
                            "rel_path": f.rel_path,
                            "abs_path": f.abs_path,
                            "binary_by_extension": f.binary_by_extension,
                        })
                    })
                    .collect();
                Value::Array(batch)
            })
            .collect();
        Ok(items)
    }

    async fn execute_one(&self, item: Value) -> Result<Value> {
        let files = item.as_array().cloned().unwrap_or_default();
        let mut entries = Vec::with_capacity(files.len());

        for file in files {
            let rel_path = file["rel_path"].as_str().unwrap_or_default().to_string();
            let abs_path = PathBuf::from(file["abs_path"].as_str().unwrap_or_default());
            let binary_by_extension = file["binary_by_extension"].as_bool().unwrap_or(false);

            let bytes = match tokio::fs::read(&abs_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(path = %rel_path, error = %e, "unreadable file skipped");
                    continue;
                }
            };
            entries.push(parse_file(&rel_path, &bytes, binary_by_extension));
        }

        Ok(serde_json::to_value(entries)?)
    }

    async fn post_batch(
        &self,
        state: &SharedState,
        _items: Vec<Value>,
        results: Vec<Value>,
    ) -> Result<Action> {
        let mut entries: Vec<FileEntry> = Vec::new();
        for result in results {
            if result.is_null() {
                continue;
            }
            let batch: Vec<FileEntry> = serde_json::from_value(result)?;
            entries.extend(batch);
        }

        let binary_count = entries.iter().filter(|e| e.is_binary).count();
        let unknown_count = entries
            .iter()
            .filter(|e| !e.is_binary && e.language == "unknown")
            .count();
        if binary_count > 0 {
            state.record_error(ErrorRecord::new(
                self.name(),
                ErrorKind::Warning,
                format!("{} binary files skipped", binary_count),
            ));
        }
        if unknown_count > 0 {
            state.record_error(ErrorRecord::new(
                self.name(),
                ErrorKind::Warning,
                format!("{} files with unknown language", unknown_count),
            ));
        }

        let graph = Self::build_dependency_graph(&entries);
        info!(
            files = entries.len(),
            modules = graph.module_names().len(),
            edges = graph.edge_count(),
            cycles = graph.cycles().len(),
            "code structure ready"
        );

        state.set(keys::CODE_STRUCTURE, &entries);
        state.set(keys::DEPENDENCIES, &graph);
        Ok(Action::default_label())
    }
}
