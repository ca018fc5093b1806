//! Module Details Batch
//!
//! One detail page per core module, generated in parallel. Each module's
//! prompt context carries its own files plus the immediate dependency
//! neighborhood, pruned by the client's input budget at call time.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use tracing::info;

use crate::analyzer::DependencyGraph;
use crate::flow::{Action, BatchNode, SharedState, keys};
use crate::llm::{GenerateRequest, LlmClient, TaskType};
use crate::types::{AtlasError, FileEntry, ModuleDescriptor, Result};

pub struct ModuleDetailsBatch {
    client: Arc<LlmClient>,
    max_modules: usize,
    concurrency: usize,
}

impl ModuleDetailsBatch {
    pub fn new(client: Arc<LlmClient>, max_modules: usize, concurrency: usize) -> Self {
        Self {
            client,
            max_modules,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl BatchNode for ModuleDetailsBatch {
    fn name(&self) -> &str {
        "module_details"
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn prepare_batch(&self, state: &SharedState) -> Result<Vec<Value>> {
        let mut modules: Vec<ModuleDescriptor> = state
            .get(keys::CORE_MODULES)
            .ok_or_else(|| AtlasError::node(self.name(), "core modules missing"))?;
        let entries: Vec<FileEntry> = state.get(keys::CODE_STRUCTURE).unwrap_or_default();
        let mut graph: DependencyGraph = state.get(keys::DEPENDENCIES).unwrap_or_default();
        graph.reindex();

        // Highest importance first; the batch cap trims the tail
        modules.sort_by(|a, b| b.normalized_importance().cmp(&a.normalized_importance()));
        modules.truncate(self.max_modules);

        let items = modules
            .into_iter()
            .map(|module| {
                let prefix = format!("{}/", module.path.trim_end_matches('/'));
                let files: Vec<String> = entries
                    .iter()
                    .filter(|e| !e.is_binary)
                    .filter(|e| e.path == module.path || e.path.starts_with(&prefix))
                    .map(|e| match &e.summary {
                        Some(summary) => {
                            format!("{}: {} [{}]", e.path, summary, e.exported_symbols.join(", "))
                        }
                        None => format!("{} [{}]", e.path, e.exported_symbols.join(", ")),
                    })
                    .collect();

                let neighbors = {
                    let mut near = graph.dependencies_of(&module.name);
                    near.extend(graph.dependents_of(&module.name));
                    near.sort();
                    near.dedup();
                    near
                };

                json!({
                    "module": module,
                    "files": files,
                    "neighbors": neighbors,
                })
            })
            .collect();
        Ok(items)
    }

    async fn execute_one(&self, item: Value) -> Result<Value> {
        let module: ModuleDescriptor = serde_json::from_value(item["module"].clone())
            .map_err(|e| AtlasError::node(self.name(), e.to_string()))?;
        let files: Vec<String> = serde_json::from_value(item["files"].clone()).unwrap_or_default();
        let neighbors: Vec<String> =
            serde_json::from_value(item["neighbors"].clone()).unwrap_or_default();

        let prompt = format!(
            "Write a detail page for the module '{}' (path `{}`, importance {}/10).\n\
             {}\n\
             Related modules: {}.\n\
             Cover purpose, key types and functions, and how it interacts with its neighbors.",
            module.name,
            module.path,
            module.normalized_importance(),
            module.description,
            if neighbors.is_empty() {
                "none".to_string()
            } else {
                neighbors.join(", ")
            },
        );

        let generation = self
            .client
            .generate(
                GenerateRequest::new(prompt)
                    .with_context(files.join("\n"))
                    .task(TaskType::GenerateContent)
                    .for_node("module_details"),
            )
            .await?;

        Ok(json!({ "name": module.name, "content": generation.text }))
    }

    async fn post_batch(
        &self,
        state: &SharedState,
        _items: Vec<Value>,
        results: Vec<Value>,
    ) -> Result<Action> {
        let mut pages = serde_json::Map::new();
        for result in results.iter().filter(|r| !r.is_null()) {
            let name = result["name"].as_str().unwrap_or_default();
            if !name.is_empty() {
                pages.insert(name.to_string(), result["content"].clone());
            }
        }
        info!(pages = pages.len(), "module detail pages generated");
        state.set(keys::MODULE_DETAILS, Value::Object(pages));
        Ok(Action::default_label())
    }
}
