//! Prepare Repo Node
//!
//! Resolves the repository source into a readable working tree via the
//! clone cache and publishes the path, name, and aggregate stats. A failure
//! here is fatal: nothing downstream can run without a tree.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::flow::{Action, Node, RetryPolicy, SharedState, keys};
use crate::repo::{Credentials, RepoFetcher, RepoSource};
use crate::types::{AtlasError, Result};

pub struct PrepareRepoNode {
    fetcher: Arc<RepoFetcher>,
    work_dir: PathBuf,
    credentials: Option<Credentials>,
}

impl PrepareRepoNode {
    pub fn new(config: &Config, work_dir: PathBuf) -> Self {
        let fetcher = Arc::new(RepoFetcher::new(
            config.repo.clone(),
            &config.llm.cache_dir,
        ));
        Self {
            fetcher,
            work_dir,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl Node for PrepareRepoNode {
    fn name(&self) -> &str {
        "prepare_repo"
    }

    fn retry_policy(&self) -> RetryPolicy {
        // Clones hit the network; transient failures deserve another try
        RetryPolicy::new(2, Duration::from_secs(2))
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let source = state
            .get_str(keys::REPO_SOURCE)
            .ok_or_else(|| AtlasError::Repo("repo_source missing from state".into()))?;
        Ok(Value::String(source))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let raw = prep.as_str().unwrap_or_default();
        let source = RepoSource::parse(raw);
        let prepared = self
            .fetcher
            .prepare(&source, &self.work_dir, self.credentials.as_ref())
            .await?;
        Ok(json!({
            "local_path": prepared.local_path,
            "name": prepared.name,
            "stats": prepared.stats,
            "from_cache": prepared.from_cache,
        }))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set(keys::LOCAL_REPO_PATH, &exec["local_path"]);
        state.set("repo_name", &exec["name"]);
        state.set(keys::REPO_STATS, &exec["stats"]);
        Ok(Action::default_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CancelToken, run_node};
    use crate::types::RepoStats;

    #[tokio::test]
    async fn test_local_repo_prepared() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("main.py"), "print(\"hi\")\n").unwrap();
        let cache = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.llm.cache_dir = cache.path().to_path_buf();
        let node = PrepareRepoNode::new(&config, cache.path().join("work"));

        let state = SharedState::new();
        state.set(keys::REPO_SOURCE, repo.path().to_string_lossy());

        let action = run_node(&node, &state, &CancelToken::new()).await.unwrap();
        assert_eq!(action, Action::default_label());
        let stats: RepoStats = state.get(keys::REPO_STATS).unwrap();
        assert_eq!(stats.file_count, 1);
        assert!(state.get_str(keys::LOCAL_REPO_PATH).is_some());
    }

    #[tokio::test]
    async fn test_unreadable_source_routes_error() {
        let cache = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.llm.cache_dir = cache.path().to_path_buf();
        let node = PrepareRepoNode::new(&config, cache.path().join("work"));

        let state = SharedState::new();
        state.set(keys::REPO_SOURCE, "/definitely/not/a/repo");

        let action = run_node(&node, &state, &CancelToken::new()).await.unwrap();
        assert!(action.is_error());
        assert!(!state.errors().is_empty());
    }
}
