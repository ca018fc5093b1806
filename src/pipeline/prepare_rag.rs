//! Prepare RAG Data Node
//!
//! Chunks parsed text files for retrieval. The chunks sit on the blackboard
//! for future consumers; nothing in the default pipeline reads them back.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::analyzer::{ChunkOptions, chunk_text};
use crate::flow::{Action, Node, SharedState, keys};
use crate::types::{AtlasError, Chunk, FileEntry, Result};

pub struct PrepareRagNode {
    options: ChunkOptions,
}

impl PrepareRagNode {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Node for PrepareRagNode {
    fn name(&self) -> &str {
        "prepare_rag"
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let root: PathBuf = state
            .get(keys::LOCAL_REPO_PATH)
            .ok_or_else(|| AtlasError::node(self.name(), "local_repo_path missing"))?;
        let entries: Vec<FileEntry> = state.get(keys::CODE_STRUCTURE).unwrap_or_default();
        let text_files: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_binary)
            .map(|e| e.path.clone())
            .collect();
        Ok(json!({ "root": root, "files": text_files }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let root = PathBuf::from(prep["root"].as_str().unwrap_or_default());
        let files: Vec<String> = serde_json::from_value(prep["files"].clone()).unwrap_or_default();

        let mut chunks: Vec<Chunk> = Vec::new();
        for rel_path in files {
            let text = match tokio::fs::read_to_string(root.join(&rel_path)).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(path = %rel_path, error = %e, "skipping unreadable file");
                    continue;
                }
            };
            chunks.extend(chunk_text(&rel_path, &text, self.options));
        }

        info!(chunks = chunks.len(), "rag chunks prepared");
        Ok(serde_json::to_value(chunks)?)
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set(keys::RAG_CHUNKS, &exec);
        Ok(Action::default_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CancelToken, run_node};

    #[tokio::test]
    async fn test_chunks_published() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.md"), "# Title\n\nBody text.\n").unwrap();

        let state = SharedState::new();
        state.set(keys::LOCAL_REPO_PATH, dir.path().to_string_lossy());
        state.set(
            keys::CODE_STRUCTURE,
            vec![FileEntry {
                path: "doc.md".into(),
                language: "markdown".into(),
                size_bytes: 20,
                is_binary: false,
                summary: None,
                imports: vec![],
                exported_symbols: vec![],
            }],
        );

        let node = PrepareRagNode::new(ChunkOptions::default());
        run_node(&node, &state, &CancelToken::new()).await.unwrap();

        let chunks: Vec<Chunk> = state.get(keys::RAG_CHUNKS).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_path, "doc.md");
        assert!(chunks[0].embedding.is_none());
    }
}
