//! Analyze History Node
//!
//! Reads the commit history, derives contribution and timeline views, and
//! asks the LLM for a short narrative. A repository without usable history
//! (not a git checkout, empty log) degrades to empty artifacts so the rest
//! of the pipeline keeps going.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::flow::{Action, Node, SharedState, keys};
use crate::llm::{GenerateRequest, LlmClient, TaskType};
use crate::repo::HistoryAnalyzer;
use crate::types::{AtlasError, CommitRecord, HistorySummary, Result};

pub struct AnalyzeHistoryNode {
    client: Arc<LlmClient>,
    max_commits: usize,
}

impl AnalyzeHistoryNode {
    pub fn new(client: Arc<LlmClient>, max_commits: usize) -> Self {
        Self {
            client,
            max_commits,
        }
    }

    fn narrative_prompt(summary: &HistorySummary, commits: &[CommitRecord]) -> String {
        let recent: Vec<String> = commits
            .iter()
            .take(20)
            .map(|c| format!("- {} ({})", c.subject, c.author))
            .collect();
        format!(
            "Write a short narrative of this repository's development history.\n\n\
             Commits per quarter: {:?}\n\
             Top contributors: {:?}\n\
             Most-changed files: {:?}\n\n\
             Recent commits:\n{}",
            summary.timeline_buckets,
            summary.contributions,
            summary.top_changed_files,
            recent.join("\n")
        )
    }
}

#[async_trait]
impl Node for AnalyzeHistoryNode {
    fn name(&self) -> &str {
        "analyze_history"
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let path: PathBuf = state
            .get(keys::LOCAL_REPO_PATH)
            .ok_or_else(|| AtlasError::Repo("local_repo_path missing from state".into()))?;
        Ok(json!({ "path": path }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let path = PathBuf::from(prep["path"].as_str().unwrap_or_default());
        let analyzer = HistoryAnalyzer::new(self.max_commits);

        let (commits, mut summary) = match analyzer.analyze(&path).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "history unavailable, continuing without it");
                (Vec::new(), HistorySummary::default())
            }
        };

        if !commits.is_empty() {
            let prompt = Self::narrative_prompt(&summary, &commits);
            match self
                .client
                .generate(
                    GenerateRequest::new(prompt)
                        .task(TaskType::Summarize)
                        .for_node(self.name()),
                )
                .await
            {
                Ok(generation) => summary.narrative = Some(generation.text),
                Err(e) => warn!(error = %e, "history narrative failed, keeping raw summary"),
            }
        }

        info!(commits = commits.len(), "history analysis complete");
        Ok(json!({ "commits": commits, "summary": summary }))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set(keys::COMMIT_HISTORY, &exec["commits"]);
        state.set(keys::HISTORY_SUMMARY, &exec["summary"]);
        Ok(Action::default_label())
    }
}
