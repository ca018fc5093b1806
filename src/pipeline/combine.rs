//! Combine Node
//!
//! Walks the generated sections and module detail pages, normalizes heading
//! levels, inserts cross-links to module pages, and lays the fragments out
//! as the documentation file tree under `<repo>/`. Missing sections get a
//! placeholder and a note in the report instead of aborting the run.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::flow::{Action, Node, SharedState, keys};
use crate::pipeline::generate::section_specs;
use crate::types::{ModuleDescriptor, Result};

/// Output file stem for a section key. The API reference lands in
/// `overview.md`; every other section file matches its key.
fn file_stem(section_key: &str) -> &str {
    match section_key {
        "api_docs" => "overview",
        other => other,
    }
}

/// Module name to file slug: lowercase, non-alphanumerics collapsed to `-`,
/// trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

pub struct CombineNode;

impl CombineNode {
    /// Demote every `#` heading after the first to `##` so each document
    /// has a single top-level title.
    fn normalize_headings(content: &str) -> String {
        let mut seen_h1 = false;
        let mut in_fence = false;
        content
            .lines()
            .map(|line| {
                if line.trim_start().starts_with("```") {
                    in_fence = !in_fence;
                }
                if !in_fence && line.starts_with("# ") {
                    if seen_h1 {
                        return format!("#{}", line);
                    }
                    seen_h1 = true;
                }
                line.to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Link the first prose occurrence of each module name to its detail
    /// page. Code fences, headings, and existing links are left alone.
    fn cross_link(content: &str, modules: &[ModuleDescriptor], link_prefix: &str) -> String {
        let mut result_lines: Vec<String> = Vec::new();
        let mut linked: std::collections::BTreeSet<&str> = Default::default();
        let mut in_fence = false;

        for line in content.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                result_lines.push(line.to_string());
                continue;
            }
            if in_fence || line.starts_with('#') || line.contains("](") {
                result_lines.push(line.to_string());
                continue;
            }

            let mut current = line.to_string();
            for module in modules {
                if module.name.len() < 3 || linked.contains(module.name.as_str()) {
                    continue;
                }
                let pattern = word_pattern(&module.name);
                let Some((start, end)) = pattern.find(&current).map(|m| (m.start(), m.end()))
                else {
                    continue;
                };
                let replacement = format!(
                    "[{}]({}{}.md)",
                    &current[start..end],
                    link_prefix,
                    slugify(&module.name)
                );
                current.replace_range(start..end, &replacement);
                linked.insert(module.name.as_str());
            }
            result_lines.push(current);
        }

        result_lines.join("\n")
    }
}

/// Word-boundary matcher for a module name. Escaped names always compile.
fn word_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).expect("escaped literal compiles")
}

#[async_trait]
impl Node for CombineNode {
    fn name(&self) -> &str {
        "combine"
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let repo_name = state
            .get_str("repo_name")
            .unwrap_or_else(|| "repository".to_string());
        let modules: Vec<ModuleDescriptor> = state.get(keys::CORE_MODULES).unwrap_or_default();

        let mut sections: BTreeMap<String, Option<String>> = BTreeMap::new();
        for spec in section_specs() {
            let key = format!("{}.{}", keys::GENERATED_CONTENT, spec.key);
            sections.insert(spec.key.to_string(), state.get_str(&key));
        }

        let details: BTreeMap<String, String> = state
            .get::<BTreeMap<String, Value>>(keys::MODULE_DETAILS)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| value.as_str().map(|s| (name, s.to_string())))
            .collect();

        Ok(json!({
            "repo_name": repo_name,
            "modules": modules,
            "sections": sections,
            "details": details,
        }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let repo_name = prep["repo_name"].as_str().unwrap_or("repository");
        let modules: Vec<ModuleDescriptor> =
            serde_json::from_value(prep["modules"].clone()).unwrap_or_default();
        let sections: BTreeMap<String, Option<String>> =
            serde_json::from_value(prep["sections"].clone()).unwrap_or_default();
        let details: BTreeMap<String, String> =
            serde_json::from_value(prep["details"].clone()).unwrap_or_default();

        let mut documents: BTreeMap<String, String> = BTreeMap::new();

        // Section documents, in declared order
        for spec in section_specs() {
            let path = format!("{}/{}.md", repo_name, file_stem(spec.key));
            let body = match sections.get(spec.key).and_then(|s| s.clone()) {
                Some(content) => {
                    let normalized = Self::normalize_headings(&content);
                    Self::cross_link(&normalized, &modules, "modules/")
                }
                None => {
                    warn!(section = spec.key, "section unavailable, emitting placeholder");
                    format!(
                        "# {}\n\n> section unavailable: generation failed or was skipped\n",
                        spec.title
                    )
                }
            };
            documents.insert(path, body);
        }

        // Module detail pages under modules/
        for (name, content) in &details {
            let path = format!("{}/modules/{}.md", repo_name, slugify(name));
            let normalized = Self::normalize_headings(content);
            documents.insert(path, Self::cross_link(&normalized, &modules, ""));
        }

        // Module index
        let mut module_index = String::from("# Modules\n\n");
        let mut sorted_modules = modules.clone();
        sorted_modules.sort_by(|a, b| {
            b.normalized_importance()
                .cmp(&a.normalized_importance())
                .then_with(|| a.name.cmp(&b.name))
        });
        for module in &sorted_modules {
            if details.contains_key(&module.name) {
                module_index.push_str(&format!(
                    "- [{}]({}.md): {}\n",
                    module.name,
                    slugify(&module.name),
                    module.description
                ));
            } else {
                module_index.push_str(&format!("- {}: {}\n", module.name, module.description));
            }
        }
        if sorted_modules.is_empty() {
            module_index.push_str("No core modules were identified.\n");
        }
        documents.insert(format!("{}/modules/index.md", repo_name), module_index);

        // Top-level navigation
        let mut index = format!("# {} Documentation\n\n", repo_name);
        for spec in section_specs() {
            index.push_str(&format!("- [{}]({}.md)\n", spec.title, file_stem(spec.key)));
        }
        index.push_str("- [Modules](modules/index.md)\n");
        documents.insert(format!("{}/index.md", repo_name), index);

        info!(documents = documents.len(), "documents combined");
        Ok(json!(documents))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set(keys::FINAL_DOCUMENTS, &exec);
        Ok(Action::default_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CancelToken, run_node};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Core Engine"), "core-engine");
        assert_eq!(slugify("llm/provider"), "llm-provider");
        assert_eq!(slugify("  Weird---Name!  "), "weird-name");
        assert_eq!(slugify("API"), "api");
    }

    #[test]
    fn test_normalize_headings_demotes_later_h1() {
        let text = "# First\n\nbody\n\n# Second\n\n```\n# not a heading\n```\n";
        let normalized = CombineNode::normalize_headings(text);
        assert!(normalized.contains("# First"));
        assert!(normalized.contains("## Second"));
        assert!(normalized.contains("\n# not a heading"));
    }

    #[test]
    fn test_cross_link_first_prose_occurrence() {
        let modules = vec![ModuleDescriptor {
            name: "parser".into(),
            path: "src/parser".into(),
            description: "parses".into(),
            importance: 8,
            depends_on: vec![],
        }];
        let text = "# Title\n\nThe parser handles input. The parser is fast.\n";
        let linked = CombineNode::cross_link(text, &modules, "modules/");
        assert!(linked.contains("[parser](modules/parser.md) handles"));
        // Only the first occurrence is linked
        assert!(linked.contains("The parser is fast."));
    }

    fn seeded_state() -> SharedState {
        let state = SharedState::new();
        state.set("repo_name", "widget");
        state.set(
            keys::CORE_MODULES,
            vec![ModuleDescriptor {
                name: "core".into(),
                path: "core".into(),
                description: "the engine".into(),
                importance: 9,
                depends_on: vec![],
            }],
        );
        state.set(
            &format!("{}.quick_look", keys::GENERATED_CONTENT),
            "# Quick Look\n\nThe core does the work.\n",
        );
        state.set(
            &format!("{}.core", keys::MODULE_DETAILS),
            "# core\n\nEngine internals.\n",
        );
        state
    }

    #[tokio::test]
    async fn test_file_tree_layout() {
        let state = seeded_state();
        run_node(&CombineNode, &state, &CancelToken::new())
            .await
            .unwrap();

        let documents: BTreeMap<String, String> = state.get(keys::FINAL_DOCUMENTS).unwrap();
        assert!(documents.contains_key("widget/index.md"));
        assert!(documents.contains_key("widget/quick_look.md"));
        assert!(documents.contains_key("widget/overview.md"));
        assert!(documents.contains_key("widget/overall_architecture.md"));
        assert!(documents.contains_key("widget/modules/index.md"));
        assert!(documents.contains_key("widget/modules/core.md"));

        // Present section carries its content with cross-links
        let quick = &documents["widget/quick_look.md"];
        assert!(quick.contains("[core](modules/core.md)"));

        // Missing sections carry placeholders
        let timeline = &documents["widget/timeline.md"];
        assert!(timeline.contains("section unavailable"));

        // Module index links the detail page
        let module_index = &documents["widget/modules/index.md"];
        assert!(module_index.contains("[core](core.md)"));
    }

    #[tokio::test]
    async fn test_zero_modules_still_produces_index() {
        let state = SharedState::new();
        state.set("repo_name", "hello");
        run_node(&CombineNode, &state, &CancelToken::new())
            .await
            .unwrap();

        let documents: BTreeMap<String, String> = state.get(keys::FINAL_DOCUMENTS).unwrap();
        assert!(
            documents["hello/modules/index.md"].contains("No core modules were identified")
        );
        // index + six sections + modules/index
        assert_eq!(documents.len(), 8);
    }
}
