//! Content Generation
//!
//! Seven generators, one per documentation section, driven by a single
//! spec table. The six single-document sections run as a parallel set;
//! module details run as a parallel batch afterwards.

mod module_details;
mod quality;
mod section;

pub use module_details::ModuleDetailsBatch;
pub use quality::{DIMENSIONS, QualityEvaluator, QualityScores, heuristic_scores};
pub use section::SectionGeneratorNode;

use crate::flow::{SharedState, keys};
use crate::types::{FileEntry, HistorySummary, ModuleDescriptor};

/// Everything that defines one generated section
pub struct SectionSpec {
    /// Blackboard/content key and output file stem
    pub key: &'static str,
    pub title: &'static str,
    /// Blackboard inputs folded into the prompt context
    pub inputs: &'static [&'static str],
    /// Minimum Mermaid diagrams the prompt asks for
    pub min_diagrams: usize,
    /// Prompt template; placeholders: {repo_name}, {title}, {min_diagrams}
    pub template: &'static str,
}

const OVERALL_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    Explain the system's layers, major components, and how data moves between them.\n\
    Include at least {min_diagrams} Mermaid diagrams (architecture, data flow, component \
    relations, deployment).";

const API_DOCS_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    Document the public surfaces of the core modules: entry points, key types, functions, \
    and usage examples. Include at least {min_diagrams} Mermaid diagram of the call \
    relationships.";

const DEPENDENCY_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    Describe internal module dependencies and external libraries, flagging any cycles.\n\
    Include at least {min_diagrams} Mermaid diagrams of the dependency structure.";

const TIMELINE_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    Tell the story of the project's evolution from its commit history: phases, \
    contributors, and turning points. Include at least {min_diagrams} Mermaid diagrams \
    (timeline or gitGraph).";

const GLOSSARY_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    Define the project's domain terms, abbreviations, and recurring names, each with a \
    short plain-language definition. Include at least {min_diagrams} Mermaid diagram \
    grouping related terms.";

const QUICK_LOOK_TEMPLATE: &str = "Write the '{title}' document for {repo_name}.\n\
    A newcomer should learn in two minutes what the project does, how it is organized, \
    and where to start reading. Include at least {min_diagrams} Mermaid diagram.";

/// The six single-document sections, in output order.
pub fn section_specs() -> &'static [SectionSpec] {
    const SPECS: &[SectionSpec] = &[
        SectionSpec {
            key: "overall_architecture",
            title: "Overall Architecture",
            inputs: &[keys::CODE_STRUCTURE, keys::CORE_MODULES, keys::HISTORY_SUMMARY],
            min_diagrams: 4,
            template: OVERALL_TEMPLATE,
        },
        SectionSpec {
            key: "api_docs",
            title: "API Reference",
            inputs: &[keys::CODE_STRUCTURE, keys::CORE_MODULES],
            min_diagrams: 1,
            template: API_DOCS_TEMPLATE,
        },
        SectionSpec {
            key: "dependency",
            title: "Dependency Map",
            inputs: &[keys::CODE_STRUCTURE, keys::CORE_MODULES, keys::DEPENDENCIES],
            min_diagrams: 2,
            template: DEPENDENCY_TEMPLATE,
        },
        SectionSpec {
            key: "timeline",
            title: "Evolution Timeline",
            inputs: &[keys::HISTORY_SUMMARY],
            min_diagrams: 2,
            template: TIMELINE_TEMPLATE,
        },
        SectionSpec {
            key: "glossary",
            title: "Glossary",
            inputs: &[keys::CODE_STRUCTURE, keys::CORE_MODULES, keys::HISTORY_SUMMARY],
            min_diagrams: 1,
            template: GLOSSARY_TEMPLATE,
        },
        SectionSpec {
            key: "quick_look",
            title: "Quick Look",
            inputs: &[keys::CODE_STRUCTURE, keys::CORE_MODULES, keys::HISTORY_SUMMARY],
            min_diagrams: 1,
            template: QUICK_LOOK_TEMPLATE,
        },
    ];
    SPECS
}

/// Fold the requested blackboard keys into one prompt context string.
/// Unavailable inputs contribute nothing; the caller decides whether an
/// entirely empty context is acceptable.
pub fn build_context(state: &SharedState, inputs: &[&str]) -> String {
    let mut sections: Vec<String> = Vec::new();

    for input in inputs {
        match *input {
            keys::CODE_STRUCTURE => {
                let entries: Vec<FileEntry> = state.get(keys::CODE_STRUCTURE).unwrap_or_default();
                if entries.is_empty() {
                    continue;
                }
                let listing: Vec<String> = entries
                    .iter()
                    .filter(|e| !e.is_binary)
                    .take(300)
                    .map(|e| match &e.summary {
                        Some(summary) => format!("{}: {}", e.path, summary),
                        None => e.path.clone(),
                    })
                    .collect();
                sections.push(format!("## File structure\n{}", listing.join("\n")));
            }
            keys::CORE_MODULES => {
                let modules: Vec<ModuleDescriptor> =
                    state.get(keys::CORE_MODULES).unwrap_or_default();
                if modules.is_empty() {
                    continue;
                }
                let listing: Vec<String> = modules
                    .iter()
                    .map(|m| {
                        format!(
                            "{} ({}, importance {}): {}",
                            m.name,
                            m.path,
                            m.normalized_importance(),
                            m.description
                        )
                    })
                    .collect();
                sections.push(format!("## Core modules\n{}", listing.join("\n")));
                if let Some(summary) = state.get_str(keys::ARCHITECTURE_SUMMARY) {
                    sections.push(format!("## Architecture summary\n{}", summary));
                }
            }
            keys::HISTORY_SUMMARY => {
                let Some(summary) = state.get::<HistorySummary>(keys::HISTORY_SUMMARY) else {
                    continue;
                };
                let mut lines = Vec::new();
                if let Some(narrative) = &summary.narrative {
                    lines.push(narrative.clone());
                }
                if !summary.timeline_buckets.is_empty() {
                    lines.push(format!("Commits per quarter: {:?}", summary.timeline_buckets));
                }
                if !summary.contributions.is_empty() {
                    lines.push(format!("Contributors: {:?}", summary.contributions));
                }
                if !summary.top_changed_files.is_empty() {
                    lines.push(format!("Most-changed files: {:?}", summary.top_changed_files));
                }
                if !lines.is_empty() {
                    sections.push(format!("## History\n{}", lines.join("\n")));
                }
            }
            keys::DEPENDENCIES => {
                if let Some(mut graph) =
                    state.get::<crate::analyzer::DependencyGraph>(keys::DEPENDENCIES)
                {
                    graph.reindex();
                    let lines = graph.to_prompt_lines();
                    if !lines.is_empty() {
                        sections.push(format!("## Module dependencies\n{}", lines));
                    }
                    if !graph.cycles().is_empty() {
                        sections.push(format!("## Dependency cycles\n{:?}", graph.cycles()));
                    }
                }
            }
            other => {
                if let Some(text) = state.get_str(other) {
                    sections.push(text);
                }
            }
        }
    }

    sections.join("\n\n")
}
