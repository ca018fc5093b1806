//! AI Understand Core Modules Node
//!
//! Sends the pruned code structure and dependency graph to the LLM and
//! parses the result into module descriptors plus an architecture summary.
//! The parser is a ladder: JSON, then YAML, then structured Markdown, then
//! a bullet-list heuristic. A composite quality score gates re-prompting;
//! when every attempt fails, a structure-only description is emitted with a
//! fixed degraded quality so downstream generators trust it lightly.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::analyzer::DependencyGraph;
use crate::constants;
use crate::flow::{Action, Node, SharedState, keys};
use crate::llm::{GenerateRequest, LlmClient, TaskType, extract_json_payload};
use crate::types::{
    AtlasError, ErrorKind, ErrorRecord, FileEntry, ModuleDescriptor, Result,
};

/// Quality weights: completeness, structure indicators, relational vocabulary
const WEIGHT_COMPLETENESS: f32 = 0.4;
const WEIGHT_STRUCTURE: f32 = 0.4;
const WEIGHT_RELATIONAL: f32 = 0.2;

pub struct AiUnderstandNode {
    client: Arc<LlmClient>,
    quality_threshold: f32,
    retry_count: u8,
}

impl AiUnderstandNode {
    pub fn new(client: Arc<LlmClient>, quality_threshold: f32, retry_count: u8) -> Self {
        Self {
            client,
            quality_threshold,
            retry_count: retry_count.max(1),
        }
    }

    fn base_prompt(structure: &str, graph: &str) -> String {
        format!(
            "Identify the core modules of this repository and summarize its architecture.\n\
             Respond with JSON: {{\"modules\": [{{\"name\", \"path\", \"description\", \
             \"importance\" (1-10), \"depends_on\": []}}], \"architecture_summary\": \"...\"}}\n\n\
             File structure:\n{}\n\nModule dependencies:\n{}",
            structure, graph
        )
    }
}

#[async_trait]
impl Node for AiUnderstandNode {
    fn name(&self) -> &str {
        "understand_code"
    }

    fn execute_timeout(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(
            crate::constants::flow::NODE_TIMEOUT_SECS,
        ))
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let entries: Vec<FileEntry> = state
            .get(keys::CODE_STRUCTURE)
            .ok_or_else(|| AtlasError::node(self.name(), "code_structure missing"))?;
        let mut graph: DependencyGraph = state.get(keys::DEPENDENCIES).unwrap_or_default();
        graph.reindex();

        // Pruned structure: one line per parsed file, capped
        let structure: Vec<String> = entries
            .iter()
            .filter(|e| !e.is_binary)
            .take(400)
            .map(|e| match &e.summary {
                Some(summary) => format!("{} ({}): {}", e.path, e.language, summary),
                None => format!("{} ({})", e.path, e.language),
            })
            .collect();

        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();

        Ok(json!({
            "structure": structure.join("\n"),
            "graph": graph.to_prompt_lines(),
            "paths": paths,
        }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let structure = prep["structure"].as_str().unwrap_or_default();
        let graph = prep["graph"].as_str().unwrap_or_default();
        let paths: Vec<String> = serde_json::from_value(prep["paths"].clone()).unwrap_or_default();

        let mut best: Option<(Vec<ModuleDescriptor>, String, f32)> = None;
        let mut prompt = Self::base_prompt(structure, graph);

        for attempt in 1..=self.retry_count {
            let generation = match self
                .client
                .generate(
                    GenerateRequest::new(prompt.clone())
                        .task(TaskType::UnderstandCode)
                        .for_node(self.name()),
                )
                .await
            {
                Ok(generation) => generation,
                Err(e) => {
                    warn!(attempt, error = %e, "understand call failed");
                    continue;
                }
            };

            let Some((modules, summary)) = parse_analysis(&generation.text) else {
                debug!(attempt, "analysis response unparseable, re-prompting");
                prompt = format!(
                    "{}\n\nYour previous answer could not be parsed. Respond with the \
                     requested JSON only.",
                    Self::base_prompt(structure, graph)
                );
                continue;
            };

            let quality = composite_quality(&modules, &summary);
            debug!(attempt, quality, modules = modules.len(), "analysis parsed");

            let better = best.as_ref().map(|(_, _, q)| quality > *q).unwrap_or(true);
            if better {
                best = Some((modules, summary, quality));
            }

            if quality >= self.quality_threshold {
                break;
            }
            prompt = format!(
                "{}\n\nYour previous answer was incomplete (score {:.2}). Cover every \
                 significant module, give each a path and importance, and describe how \
                 the modules depend on each other.",
                Self::base_prompt(structure, graph),
                quality
            );
        }

        let (modules, summary, quality) = match best {
            Some(found) => found,
            None => {
                warn!("all understanding attempts failed, emitting degraded structure-only analysis");
                let (modules, summary) = degraded_analysis(&paths);
                (modules, summary, constants::quality::DEGRADED_SCORE)
            }
        };

        info!(modules = modules.len(), quality, "core module analysis ready");
        Ok(json!({
            "modules": modules,
            "summary": summary,
            "quality": quality,
        }))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        let mut modules: Vec<ModuleDescriptor> =
            serde_json::from_value(exec["modules"].clone()).unwrap_or_default();

        // Descriptors must resolve into the parsed structure
        let entries: Vec<FileEntry> = state.get(keys::CODE_STRUCTURE).unwrap_or_default();
        let known_prefixes: BTreeSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        modules.retain(|module| {
            let resolves = known_prefixes
                .iter()
                .any(|path| *path == module.path || path.starts_with(&format!("{}/", module.path.trim_end_matches('/'))));
            if !resolves {
                warn!(module = %module.name, path = %module.path, "descriptor path unresolved, dropping");
                state.record_error(ErrorRecord::new(
                    self.name(),
                    ErrorKind::Warning,
                    format!("dropped module '{}': path '{}' not in structure", module.name, module.path),
                ));
            }
            resolves
        });

        state.set(keys::CORE_MODULES, &modules);
        state.set(keys::ARCHITECTURE_SUMMARY, &exec["summary"]);
        state.set(keys::ANALYSIS_QUALITY, &exec["quality"]);
        Ok(Action::default_label())
    }
}

// =============================================================================
// Parse Ladder
// =============================================================================

/// JSON → YAML → Markdown sections → bullet heuristic.
pub fn parse_analysis(text: &str) -> Option<(Vec<ModuleDescriptor>, String)> {
    if let Some(parsed) = parse_json(text) {
        return Some(parsed);
    }
    if let Some(parsed) = parse_yaml(text) {
        return Some(parsed);
    }
    if let Some(parsed) = parse_markdown(text) {
        return Some(parsed);
    }
    parse_bullets(text)
}

fn descriptors_from_value(value: &Value) -> Option<Vec<ModuleDescriptor>> {
    let list = value.as_array()?;
    let modules: Vec<ModuleDescriptor> = list
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let path = item
                .get("path")
                .and_then(|p| p.as_str())
                .unwrap_or(&name)
                .to_string();
            let description = item
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let importance = match item.get("importance") {
                Some(Value::Number(n)) => n.as_u64().unwrap_or(5) as u8,
                Some(Value::String(s)) => s.parse().unwrap_or(5),
                _ => 5,
            };
            let depends_on = item
                .get("depends_on")
                .and_then(|d| d.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            Some(ModuleDescriptor {
                name,
                path,
                description,
                importance: importance.clamp(1, 10),
                depends_on,
            })
        })
        .collect();

    if modules.is_empty() { None } else { Some(modules) }
}

fn analysis_from_value(value: &Value) -> Option<(Vec<ModuleDescriptor>, String)> {
    let modules = if value.is_array() {
        descriptors_from_value(value)?
    } else {
        descriptors_from_value(value.get("modules")?)?
    };
    let summary = value
        .get("architecture_summary")
        .or_else(|| value.get("summary"))
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string();
    Some((modules, summary))
}

fn parse_json(text: &str) -> Option<(Vec<ModuleDescriptor>, String)> {
    let payload = extract_json_payload(text)?;
    let value: Value = serde_json::from_str(&payload).ok()?;
    analysis_from_value(&value)
}

fn parse_yaml(text: &str) -> Option<(Vec<ModuleDescriptor>, String)> {
    // Strip a ```yaml fence when present, else try the raw text
    let body = text
        .split("```yaml")
        .nth(1)
        .and_then(|after| after.split("```").next())
        .unwrap_or(text);
    let value: Value = serde_yaml::from_str(body).ok()?;
    if !value.is_object() && !value.is_array() {
        return None;
    }
    analysis_from_value(&value)
}

fn parse_markdown(text: &str) -> Option<(Vec<ModuleDescriptor>, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^[-*]\s+\*\*([^*]+)\*\*\s*\(`?([^`)]+)`?\)\s*[:-]\s*(.+)$")
            .expect("static regex")
    });

    let modules: Vec<ModuleDescriptor> = re
        .captures_iter(text)
        .map(|captures| ModuleDescriptor {
            name: captures[1].trim().to_string(),
            path: captures[2].trim().to_string(),
            description: captures[3].trim().to_string(),
            importance: 5,
            depends_on: Vec::new(),
        })
        .collect();
    if modules.is_empty() {
        return None;
    }

    // Architecture section text, when present
    let summary = text
        .split("## Architecture")
        .nth(1)
        .map(|after| {
            after
                .lines()
                .skip_while(|l| l.trim().is_empty())
                .take_while(|l| !l.starts_with("##"))
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string()
        })
        .unwrap_or_default();
    Some((modules, summary))
}

/// Last rung: any bullet list of `name: description` pairs.
fn parse_bullets(text: &str) -> Option<(Vec<ModuleDescriptor>, String)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^[-*]\s+`?([A-Za-z_][\w/.-]*)`?\s*[:—-]\s*(.+)$").expect("static regex")
    });

    let modules: Vec<ModuleDescriptor> = re
        .captures_iter(text)
        .map(|captures| ModuleDescriptor {
            name: captures[1].trim().trim_matches('/').to_string(),
            path: captures[1].trim().trim_matches('/').to_string(),
            description: captures[2].trim().to_string(),
            importance: 5,
            depends_on: Vec::new(),
        })
        .collect();
    if modules.is_empty() {
        None
    } else {
        Some((modules, String::new()))
    }
}

// =============================================================================
// Quality and Fallback
// =============================================================================

/// Composite score: completeness x0.4 + structure indicators x0.4 +
/// relational vocabulary x0.2, all in [0, 1].
pub fn composite_quality(modules: &[ModuleDescriptor], summary: &str) -> f32 {
    if modules.is_empty() {
        return 0.0;
    }

    let described = modules
        .iter()
        .filter(|m| m.description.len() >= 10)
        .count() as f32;
    let completeness = (described / modules.len() as f32)
        * (modules.len() as f32 / 3.0).min(1.0);

    let structured = modules
        .iter()
        .filter(|m| m.path != m.name || !m.depends_on.is_empty() || m.importance != 5)
        .count() as f32;
    let structure = structured / modules.len() as f32;

    let relational_terms = [
        "depend", "uses", "calls", "layer", "flows", "imports", "between", "interacts",
    ];
    let lower = summary.to_lowercase();
    let hits = relational_terms
        .iter()
        .filter(|term| lower.contains(**term))
        .count() as f32;
    let relational = (hits / 3.0).min(1.0);

    completeness * WEIGHT_COMPLETENESS + structure * WEIGHT_STRUCTURE + relational * WEIGHT_RELATIONAL
}

/// Structure-only fallback: directories holding a package marker or a
/// "main"-shaped entry file become modules.
pub fn degraded_analysis(paths: &[String]) -> (Vec<ModuleDescriptor>, String) {
    const MARKERS: &[&str] = &[
        "__init__.py",
        "mod.rs",
        "lib.rs",
        "index.js",
        "index.ts",
        "main.py",
        "main.rs",
        "main.go",
    ];

    let mut seen = BTreeSet::new();
    let mut modules = Vec::new();
    for path in paths {
        let Some((dir, file)) = path.rsplit_once('/') else {
            continue;
        };
        if MARKERS.contains(&file) && seen.insert(dir.to_string()) {
            modules.push(ModuleDescriptor {
                name: dir.rsplit('/').next().unwrap_or(dir).to_string(),
                path: dir.to_string(),
                description: format!("Package rooted at {}", dir),
                importance: 5,
                depends_on: Vec::new(),
            });
        }
    }

    let mut extensions: std::collections::BTreeMap<&str, usize> = Default::default();
    for path in paths {
        if let Some((_, ext)) = path.rsplit_once('.') {
            *extensions.entry(ext).or_insert(0) += 1;
        }
    }
    let breakdown: Vec<String> = extensions
        .into_iter()
        .map(|(ext, count)| format!("{} x{}", ext, count))
        .collect();

    let summary = format!(
        "Automatic analysis was unavailable; this is a structural sketch. \
         The repository contains {} files ({}).",
        paths.len(),
        breakdown.join(", ")
    );
    (modules, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CancelToken, run_node};
    use crate::llm::stub::{StubProvider, stub_client};

    const GOOD_JSON: &str = r#"```json
{
  "modules": [
    {"name": "core", "path": "core", "description": "The dataflow engine behind everything", "importance": 9, "depends_on": []},
    {"name": "api", "path": "api", "description": "Public HTTP surface over the engine", "importance": 7, "depends_on": ["core"]}
  ],
  "architecture_summary": "The api layer depends on core; data flows between them through queues."
}
```"#;

    #[test]
    fn test_parse_json_rung() {
        let (modules, summary) = parse_analysis(GOOD_JSON).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "core");
        assert_eq!(modules[1].depends_on, vec!["core"]);
        assert!(summary.contains("depends on core"));
    }

    #[test]
    fn test_parse_yaml_rung() {
        let text = "```yaml\nmodules:\n  - name: core\n    path: src/core\n    description: the engine room of the project\n    importance: 8\nsummary: core uses layered queues\n```";
        let (modules, summary) = parse_analysis(text).unwrap();
        assert_eq!(modules[0].path, "src/core");
        assert_eq!(modules[0].importance, 8);
        assert!(summary.contains("layered"));
    }

    #[test]
    fn test_parse_markdown_rung() {
        let text = "## Modules\n\n- **core** (`src/core`): the engine that schedules everything\n- **api** (`src/api`): request handling\n\n## Architecture\n\nA thin api over a fat core.\n";
        let (modules, summary) = parse_analysis(text).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].path, "src/core");
        assert_eq!(summary, "A thin api over a fat core.");
    }

    #[test]
    fn test_parse_bullet_heuristic() {
        let text = "The main parts are:\n- parser: turns text into trees\n- emitter: turns trees back into text\n";
        let (modules, _) = parse_analysis(text).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "parser");
        assert_eq!(modules[0].importance, 5);
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(parse_analysis("I have no idea what this repository does.").is_none());
    }

    #[test]
    fn test_quality_rewards_structure_and_vocabulary() {
        let (modules, summary) = parse_analysis(GOOD_JSON).unwrap();
        let good = composite_quality(&modules, &summary);
        assert!(good > 0.7, "got {}", good);

        let thin = vec![ModuleDescriptor {
            name: "x".into(),
            path: "x".into(),
            description: "?".into(),
            importance: 5,
            depends_on: vec![],
        }];
        let poor = composite_quality(&thin, "");
        assert!(poor < 0.3, "got {}", poor);
        assert_eq!(composite_quality(&[], ""), 0.0);
    }

    #[test]
    fn test_degraded_analysis_finds_packages() {
        let paths = vec![
            "pkg/__init__.py".to_string(),
            "pkg/logic.py".to_string(),
            "tool/main.py".to_string(),
            "README.md".to_string(),
        ];
        let (modules, summary) = degraded_analysis(&paths);
        assert_eq!(modules.len(), 2);
        assert!(modules.iter().any(|m| m.path == "pkg"));
        assert!(modules.iter().any(|m| m.path == "tool"));
        assert!(summary.contains("structural sketch"));
    }

    #[tokio::test]
    async fn test_node_drops_unresolved_descriptor_paths() {
        let dir = tempfile::tempdir().unwrap();
        let response = r#"{"modules": [
            {"name": "core", "path": "core", "description": "real module with real files behind it", "importance": 8, "depends_on": []},
            {"name": "ghost", "path": "ghost", "description": "a module the model hallucinated outright", "importance": 3, "depends_on": []}
        ], "architecture_summary": "core depends on nothing; data flows inward."}"#;
        let client = Arc::new(stub_client(Arc::new(StubProvider::always(response)), dir.path()));
        let node = AiUnderstandNode::new(client, 0.5, 2);

        let state = SharedState::new();
        let entries = vec![FileEntry {
            path: "core/engine.py".into(),
            language: "python".into(),
            size_bytes: 10,
            is_binary: false,
            summary: None,
            imports: vec![],
            exported_symbols: vec![],
        }];
        state.set(keys::CODE_STRUCTURE, &entries);

        run_node(&node, &state, &CancelToken::new()).await.unwrap();

        let modules: Vec<ModuleDescriptor> = state.get(keys::CORE_MODULES).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "core");
        assert!(state.errors().iter().any(|e| e.message.contains("ghost")));
    }

    #[tokio::test]
    async fn test_degraded_fallback_quality_recorded() {
        let dir = tempfile::tempdir().unwrap();
        // Responses that never parse
        let client = Arc::new(stub_client(
            Arc::new(StubProvider::always(
                "I am unable to analyze this repository in any structured way.",
            )),
            dir.path(),
        ));
        let node = AiUnderstandNode::new(client, 0.7, 2);

        let state = SharedState::new();
        let entries = vec![FileEntry {
            path: "pkg/__init__.py".into(),
            language: "python".into(),
            size_bytes: 1,
            is_binary: false,
            summary: None,
            imports: vec![],
            exported_symbols: vec![],
        }];
        state.set(keys::CODE_STRUCTURE, &entries);

        run_node(&node, &state, &CancelToken::new()).await.unwrap();

        let quality: f32 = state.get(keys::ANALYSIS_QUALITY).unwrap();
        assert!((quality - constants::quality::DEGRADED_SCORE).abs() < f32::EPSILON);
        let modules: Vec<ModuleDescriptor> = state.get(keys::CORE_MODULES).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].path, "pkg");
    }
}
