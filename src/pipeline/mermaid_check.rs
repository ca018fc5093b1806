//! Mermaid Validation Node
//!
//! Runs after all sections are produced: scans every piece of generated
//! content for Mermaid blocks, repairs what it can, and records findings
//! for the rest. Repaired documents replace their blackboard entries.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use tracing::info;

use crate::config::MermaidConfig;
use crate::flow::{Action, Node, SharedState, keys};
use crate::llm::LlmClient;
use crate::mermaid::MermaidEngine;
use crate::pipeline::generate::section_specs;
use crate::types::{Result, ValidationFinding};

pub struct MermaidValidationNode {
    engine: MermaidEngine,
}

impl MermaidValidationNode {
    pub fn new(config: MermaidConfig, client: Arc<LlmClient>) -> Self {
        Self {
            engine: MermaidEngine::new(config, client),
        }
    }
}

#[async_trait]
impl Node for MermaidValidationNode {
    fn name(&self) -> &str {
        "mermaid_validation"
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let mut documents: Vec<(String, String)> = Vec::new();

        for spec in section_specs() {
            let key = format!("{}.{}", keys::GENERATED_CONTENT, spec.key);
            if let Some(content) = state.get_str(&key) {
                documents.push((key, content));
            }
        }

        if let Some(Value::Object(pages)) = state.get_value(keys::MODULE_DETAILS) {
            for (name, content) in pages {
                if let Value::String(content) = content {
                    documents.push((format!("{}.{}", keys::MODULE_DETAILS, name), content));
                }
            }
        }

        Ok(json!(documents))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let documents: Vec<(String, String)> = serde_json::from_value(prep)?;
        let mut updated: Vec<(String, String)> = Vec::new();
        let mut findings: Vec<ValidationFinding> = Vec::new();

        for (key, content) in documents {
            let outcome = self.engine.process_document(&key, &content).await;
            if outcome.changed {
                updated.push((key.clone(), outcome.content));
            }
            findings.extend(outcome.findings);
        }

        info!(
            repaired = updated.len(),
            findings = findings.len(),
            "mermaid validation complete"
        );
        Ok(json!({ "updated": updated, "findings": findings }))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        let updated: Vec<(String, String)> =
            serde_json::from_value(exec["updated"].clone()).unwrap_or_default();
        for (key, content) in updated {
            state.set(&key, content);
        }
        state.set(keys::MERMAID_REPORT, &exec["findings"]);
        Ok(Action::default_label())
    }
}
