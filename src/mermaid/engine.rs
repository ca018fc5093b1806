//! Mermaid Validation Engine
//!
//! Scans generated documents for fenced Mermaid blocks, validates each one,
//! and asks the LLM to repair invalid charts. Repairs that still fail
//! validation are discarded: the original block stays in place and a
//! warning finding is recorded. Running the engine twice over the same
//! document is a no-op on the second pass.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::extract::{body_from_response, extract_blocks, replace_block};
use super::validate::{ChartValidation, ChartValidator};
use crate::config::MermaidConfig;
use crate::llm::{GenerateRequest, LlmClient, TaskType};
use crate::types::{FindingSeverity, ValidationFinding};

const DEFAULT_REGENERATION_PROMPT: &str = "The following Mermaid diagram fails validation.\n\
     Errors:\n{errors}\n\nDiagram:\n```mermaid\n{chart}\n```\n\n\
     Fix the syntax errors while preserving the diagram's meaning.";

/// Result of processing one document
#[derive(Debug)]
pub struct DocumentOutcome {
    pub content: String,
    pub findings: Vec<ValidationFinding>,
    pub changed: bool,
}

/// The validation/regeneration engine.
pub struct MermaidEngine {
    config: MermaidConfig,
    validator: ChartValidator,
    client: Arc<LlmClient>,
}

impl MermaidEngine {
    pub fn new(config: MermaidConfig, client: Arc<LlmClient>) -> Self {
        let validator = ChartValidator::new(config.supported_chart_types.clone());
        Self {
            config,
            validator,
            client,
        }
    }

    /// Validate and repair every Mermaid block in one document.
    pub async fn process_document(&self, document_path: &str, content: &str) -> DocumentOutcome {
        if !self.config.enabled {
            return DocumentOutcome {
                content: content.to_string(),
                findings: Vec::new(),
                changed: false,
            };
        }

        let mut current = content.to_string();
        let mut findings = Vec::new();
        let mut changed = false;
        let mut chart_index = 0;

        // Substitutions shift offsets, so re-extract after each repair and
        // walk by index.
        loop {
            let blocks = extract_blocks(&current);
            let Some(block) = blocks.iter().find(|b| b.chart_index == chart_index) else {
                break;
            };

            let validation = self.validate_block(&block.body);
            if validation.is_valid {
                chart_index += 1;
                continue;
            }

            debug!(
                document = document_path,
                chart = chart_index,
                errors = %validation.error_summary(),
                "invalid mermaid block"
            );

            match self.regenerate(&block.body, &validation).await {
                Some(fixed_body) => {
                    info!(
                        document = document_path,
                        chart = chart_index,
                        "mermaid block repaired"
                    );
                    current = replace_block(&current, block, &fixed_body);
                    changed = true;
                }
                None => {
                    warn!(
                        document = document_path,
                        chart = chart_index,
                        "regeneration exhausted, keeping original block"
                    );
                    findings.push(ValidationFinding {
                        document_path: document_path.to_string(),
                        chart_index,
                        chart_text: block.body.clone(),
                        error_message: validation.error_summary(),
                        severity: FindingSeverity::Warning,
                    });
                }
            }
            chart_index += 1;
        }

        DocumentOutcome {
            content: current,
            findings,
            changed,
        }
    }

    fn validate_block(&self, body: &str) -> ChartValidation {
        // An external renderer would be invoked here when configured; the
        // rule validator is both the fallback and the default.
        if self.config.use_external_renderer && !self.config.fallback_to_rules {
            warn!("external renderer not available; applying rule validation anyway");
        }
        self.validator.validate(body)
    }

    /// Ask the LLM for a repaired chart. Returns a body that passed
    /// validation, or None after exhausting the attempt budget.
    async fn regenerate(&self, body: &str, validation: &ChartValidation) -> Option<String> {
        let template = self
            .config
            .regeneration_prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_REGENERATION_PROMPT);
        let prompt = template
            .replace("{chart}", body)
            .replace("{errors}", &validation.error_summary());

        for attempt in 1..=self.config.max_regeneration_attempts {
            let request = GenerateRequest::new(prompt.clone())
                .task(TaskType::FixMermaid)
                .for_node("mermaid_validation");

            let response = match self.client.generate(request).await {
                Ok(generation) => generation.text,
                Err(e) => {
                    warn!(attempt, error = %e, "mermaid regeneration call failed");
                    continue;
                }
            };

            let Some(candidate) = body_from_response(&response) else {
                debug!(attempt, "repair response had no usable chart body");
                continue;
            };

            if self.validator.validate(&candidate).is_valid {
                return Some(candidate);
            }
            debug!(attempt, "repaired chart still invalid");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::stub::{StubProvider, StubStep, stub_client};

    const BAD_DOC: &str = "# Arch\n\n```mermaid\ngraph TD\n    A[foo(bar)] --> B\n```\n\nText.\n";
    const GOOD_DOC: &str = "# Arch\n\n```mermaid\ngraph TD\n    A[foo] --> B\n```\n\nText.\n";

    fn engine_with(provider: Arc<StubProvider>, tmp: &std::path::Path) -> MermaidEngine {
        let client = Arc::new(stub_client(provider, tmp));
        MermaidEngine::new(MermaidConfig::default(), client)
    }

    #[tokio::test]
    async fn test_valid_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::always("unused"));
        let engine = engine_with(provider.clone(), dir.path());

        let outcome = engine.process_document("arch.md", GOOD_DOC).await;
        assert!(!outcome.changed);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.content, GOOD_DOC);
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_block_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::always(
            "```mermaid\ngraph TD\n    A[foo bar] --> B\n```",
        ));
        let engine = engine_with(provider, dir.path());

        let outcome = engine.process_document("arch.md", BAD_DOC).await;
        assert!(outcome.changed);
        assert!(outcome.findings.is_empty());
        assert!(outcome.content.contains("A[foo bar] --> B"));
        assert!(!outcome.content.contains("A[foo(bar)]"));
        // Prose around the chart survives
        assert!(outcome.content.contains("# Arch"));
        assert!(outcome.content.contains("Text."));
    }

    #[tokio::test]
    async fn test_stubborn_block_kept_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        // The repair returns the same broken chart every time
        let provider = Arc::new(StubProvider::scripted(
            vec![
                StubStep::Ok("```mermaid\ngraph TD\n    A[foo(bar)] --> B\n```".to_string()),
                StubStep::Ok("```mermaid\ngraph TD\n    A[foo(bar)] --> B\n```".to_string()),
            ],
            "```mermaid\ngraph TD\n    A[foo(bar)] --> B\n```",
        ));
        let engine = engine_with(provider, dir.path());

        let outcome = engine.process_document("arch.md", BAD_DOC).await;
        assert!(!outcome.changed);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].severity, FindingSeverity::Warning);
        assert_eq!(outcome.findings[0].chart_index, 0);
        // Original retained
        assert!(outcome.content.contains("A[foo(bar)]"));
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::always(
            "```mermaid\ngraph TD\n    A[foo bar] --> B\n```",
        ));
        let engine = engine_with(provider.clone(), dir.path());

        let first = engine.process_document("arch.md", BAD_DOC).await;
        assert!(first.changed);

        let calls_after_first = provider.calls.load(std::sync::atomic::Ordering::SeqCst);
        let second = engine.process_document("arch.md", &first.content).await;
        assert!(!second.changed);
        assert_eq!(second.content, first.content);
        assert_eq!(
            provider.calls.load(std::sync::atomic::Ordering::SeqCst),
            calls_after_first
        );
    }

    #[tokio::test]
    async fn test_disabled_engine_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::always("unused"));
        let client = Arc::new(stub_client(provider, dir.path()));
        let config = MermaidConfig {
            enabled: false,
            ..Default::default()
        };
        let engine = MermaidEngine::new(config, client);

        let outcome = engine.process_document("arch.md", BAD_DOC).await;
        assert!(!outcome.changed);
        assert_eq!(outcome.content, BAD_DOC);
    }
}
