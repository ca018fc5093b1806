//! Documentation Pipeline
//!
//! Wires the analysis and generation nodes into the top-level flow:
//!
//! ```text
//! input -> prepare_repo -> analyze_repo -> generate_sections
//!       -> module_details -> mermaid_validation -> combine -> format
//! ```
//!
//! `analyze_repo` is a nested sub-flow (parse, history, understand, rag);
//! `generate_sections` fans the seven generators out on the configured
//! scheduler; `module_details` is a parallel batch.

mod analyze_history;
mod combine;
mod format;
pub mod generate;
mod input;
mod mermaid_check;
mod parse_code;
mod prepare_repo;
mod prepare_rag;
mod report;
mod understand;

pub use analyze_history::AnalyzeHistoryNode;
pub use combine::{CombineNode, slugify};
pub use format::FormatNode;
pub use input::{InputNode, RunOptions};
pub use mermaid_check::MermaidValidationNode;
pub use parse_code::ParseCodeBatch;
pub use prepare_repo::PrepareRepoNode;
pub use prepare_rag::PrepareRagNode;
pub use report::RunReport;
pub use understand::AiUnderstandNode;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::ChunkOptions;
use crate::config::Config;
use crate::flow::{
    BatchRunner, CancelToken, ExecutionMode, Flow, ParallelSet, SharedNode, SharedState,
};
use crate::llm::LlmClient;
use crate::types::{AtlasError, Result};

use generate::{ModuleDetailsBatch, SectionGeneratorNode, section_specs};

/// What a finished run hands back to the caller
#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: RunReport,
    pub files_written: usize,
    pub state: SharedState,
}

/// Builds and runs the documentation flow.
pub struct Pipeline {
    config: Arc<Config>,
    client: Arc<LlmClient>,
    work_dir: PathBuf,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, client: Arc<LlmClient>) -> Self {
        let work_dir = config.llm.cache_dir.join("work");
        Self {
            config,
            client,
            work_dir,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Token observed between nodes and batch items; cancel() stops the run
    /// at the next checkpoint.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn execution_mode(&self) -> ExecutionMode {
        if self.config.general.parallel_enabled {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }

    fn build_flow(&self, options: RunOptions) -> Result<Flow> {
        let config = &self.config;
        let mode = self.execution_mode();

        // Analysis sub-flow
        let parse = if config.general.parallel_enabled {
            BatchRunner::parallel(ParseCodeBatch::new(config.parse.clone()))
        } else {
            BatchRunner::sequential(ParseCodeBatch::new(config.parse.clone()))
        }
        .with_cancel_token(self.cancel.clone());

        let analysis = Flow::builder("analyze_repo")
            .node(Arc::new(parse))
            .node(Arc::new(AnalyzeHistoryNode::new(
                Arc::clone(&self.client),
                config.repo.max_commits,
            )))
            .node(Arc::new(AiUnderstandNode::new(
                Arc::clone(&self.client),
                config.quality.overall_threshold,
                config.llm.retry_count,
            )))
            .node(Arc::new(PrepareRagNode::new(ChunkOptions::default())))
            .edge("parse_code", "analyze_history")
            .edge("analyze_history", "understand_code")
            .edge("understand_code", "prepare_rag")
            .cancel_token(self.cancel.clone())
            .build()?;

        // Generator fan-out
        let generators: Vec<SharedNode> = section_specs()
            .iter()
            .map(|spec| {
                Arc::new(SectionGeneratorNode::new(
                    spec,
                    Arc::clone(&self.client),
                    config.quality.clone(),
                )) as SharedNode
            })
            .collect();
        let generate_set = ParallelSet::new("generate_sections", generators)
            .with_mode(mode)
            .with_max_workers(config.general.max_workers)
            .with_cancel_token(self.cancel.clone());

        let details_batch = ModuleDetailsBatch::new(
            Arc::clone(&self.client),
            config.quality.max_modules_per_batch,
            config.general.max_workers,
        );
        let details = if config.general.parallel_enabled {
            BatchRunner::parallel(details_batch)
        } else {
            BatchRunner::sequential(details_batch)
        }
        .with_cancel_token(self.cancel.clone());

        Flow::builder("codeatlas")
            .node(Arc::new(InputNode::new(options)))
            .node(Arc::new(
                PrepareRepoNode::new(config, self.work_dir.clone()),
            ))
            .node(Arc::new(analysis))
            .node(Arc::new(generate_set))
            .node(Arc::new(details))
            .node(Arc::new(MermaidValidationNode::new(
                config.mermaid.clone(),
                Arc::clone(&self.client),
            )))
            .node(Arc::new(CombineNode))
            .node(Arc::new(FormatNode::new(config.mermaid.backup_files)))
            .start("input")
            .edge("input", "prepare_repo")
            .edge("prepare_repo", "analyze_repo")
            .edge("analyze_repo", "generate_sections")
            .edge("generate_sections", "module_details")
            .edge("module_details", "mermaid_validation")
            .edge("mermaid_validation", "combine")
            .edge("combine", "format")
            .cancel_token(self.cancel.clone())
            .build()
    }

    /// Run the full pipeline. A run that wrote any file succeeds and carries
    /// its failures in the report; a run that produced nothing fails.
    pub async fn run(&self, options: RunOptions) -> Result<PipelineOutcome> {
        let output_dir = options.output_dir.clone();
        let flow = self.build_flow(options)?;
        let state = SharedState::new();

        let final_action = flow.run(&state).await?;
        if final_action.is_error() {
            warn!("flow terminated on an unrouted error");
        }

        let files_written = state
            .get::<Vec<String>>("process_status.files_written")
            .map(|w| w.len())
            .unwrap_or(0);

        let report = RunReport::from_state(&state, self.client.usage());
        if files_written > 0 {
            let repo_name = state
                .get_str("repo_name")
                .unwrap_or_else(|| "repository".to_string());
            report.write(&output_dir.join(repo_name)).await?;
        }

        if files_written == 0 {
            let reason = report
                .errors
                .iter()
                .map(|e| format!("[{}] {}", e.stage, e.message))
                .next_back()
                .unwrap_or_else(|| "no documents were produced".to_string());
            return Err(AtlasError::Assembly(format!(
                "run produced no output: {}",
                reason
            )));
        }

        info!(
            files = files_written,
            errors = report.errors.len(),
            "pipeline finished"
        );
        Ok(PipelineOutcome {
            report,
            files_written,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::keys as state_keys;
    use crate::llm::stub::StubProvider;
    use std::collections::BTreeMap;

    const CANNED: &str = "# Section\n\nA canned but sufficiently long documentation body \
                          that describes the repository in enough words to pass checks.";

    fn one_file_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.py"), "print(\"hi\")\n").unwrap();
        dir
    }

    fn pipeline_for(tmp: &std::path::Path, parallel: bool) -> (Pipeline, Arc<StubProvider>) {
        let provider = Arc::new(StubProvider::always(CANNED));
        let mut config = Config::default();
        config.llm.model = "stub/fake-model".to_string();
        config.llm.cache_dir = tmp.join("cache");
        config.llm.cache_enabled = false;
        config.general.parallel_enabled = parallel;
        let config = Arc::new(config);
        let client = {
            let client = LlmClient::new(Arc::clone(&config));
            client.register_provider("stub", provider.clone());
            Arc::new(client)
        };
        (
            Pipeline::new(config, client).with_work_dir(tmp.join("work")),
            provider,
        )
    }

    fn options(repo: &std::path::Path, out: &std::path::Path) -> RunOptions {
        RunOptions {
            repo_source: repo.to_string_lossy().to_string(),
            target_language: "en".into(),
            output_dir: out.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_single_file_repo_end_to_end() {
        let repo = one_file_repo();
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("output");

        let (pipeline, _) = pipeline_for(tmp.path(), true);
        let outcome = pipeline
            .run(options(repo.path(), &out))
            .await
            .unwrap();

        let repo_name = outcome.state.get_str("repo_name").unwrap();
        let root = out.join(&repo_name);

        assert!(root.join("index.md").exists());
        for section in [
            "overall_architecture.md",
            "overview.md",
            "dependency.md",
            "glossary.md",
            "timeline.md",
            "quick_look.md",
        ] {
            assert!(root.join(section).exists(), "missing {}", section);
        }
        assert!(root.join("modules/index.md").exists());
        assert!(root.join("report.json").exists());

        assert!(!outcome.report.has_fatal_errors());
        assert!(outcome.files_written >= 8);
    }

    #[tokio::test]
    async fn test_sequential_and_parallel_runs_match() {
        let repo = one_file_repo();

        let seq_tmp = tempfile::tempdir().unwrap();
        let (seq_pipeline, _) = pipeline_for(seq_tmp.path(), false);
        let seq_outcome = seq_pipeline
            .run(options(repo.path(), &seq_tmp.path().join("out")))
            .await
            .unwrap();

        let par_tmp = tempfile::tempdir().unwrap();
        let (par_pipeline, _) = pipeline_for(par_tmp.path(), true);
        let par_outcome = par_pipeline
            .run(options(repo.path(), &par_tmp.path().join("out")))
            .await
            .unwrap();

        let seq_docs: BTreeMap<String, String> = seq_outcome
            .state
            .get(state_keys::FINAL_DOCUMENTS)
            .unwrap();
        let par_docs: BTreeMap<String, String> = par_outcome
            .state
            .get(state_keys::FINAL_DOCUMENTS)
            .unwrap();
        assert_eq!(seq_docs, par_docs);
    }

    #[tokio::test]
    async fn test_unreadable_repo_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, provider) = pipeline_for(tmp.path(), true);

        let err = pipeline
            .run(RunOptions {
                repo_source: "/definitely/not/there".into(),
                target_language: "en".into(),
                output_dir: tmp.path().join("out"),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no output"));
        // Nothing was generated
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_cancellation_stops_early() {
        let repo = one_file_repo();
        let tmp = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline_for(tmp.path(), true);

        let cancel = pipeline.cancel_token();
        cancel.cancel();

        let err = pipeline
            .run(options(repo.path(), &tmp.path().join("out")))
            .await
            .unwrap_err();
        assert!(matches!(err, AtlasError::Cancelled));
    }
}
