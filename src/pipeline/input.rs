//! Input Node
//!
//! Seeds the blackboard from the run options: repository source, target
//! language, and output directory. Everything downstream reads these keys
//! instead of carrying options through constructors.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;

use crate::flow::{Action, Node, SharedState, keys};
use crate::types::{AtlasError, Result};

/// Options collected from the process boundary
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// URL or local path of the repository
    pub repo_source: String,
    /// ISO short code for generated prose
    pub target_language: String,
    /// Root of the generated documentation tree
    pub output_dir: PathBuf,
}

pub struct InputNode {
    options: RunOptions,
}

impl InputNode {
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Node for InputNode {
    fn name(&self) -> &str {
        "input"
    }

    async fn prepare(&self, _state: &SharedState) -> Result<Value> {
        if self.options.repo_source.trim().is_empty() {
            return Err(AtlasError::Config("repo_source must not be empty".into()));
        }
        Ok(json!({
            "repo_source": self.options.repo_source,
            "target_language": self.options.target_language,
            "output_dir": self.options.output_dir,
        }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        Ok(prep)
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set(keys::REPO_SOURCE, &exec["repo_source"]);
        state.set(keys::TARGET_LANGUAGE, &exec["target_language"]);
        state.set(keys::OUTPUT_DIR, &exec["output_dir"]);
        Ok(Action::default_label())
    }
}
