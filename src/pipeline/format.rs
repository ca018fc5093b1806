//! Format Node
//!
//! Final presentation pass over `final_documents`: emoji markers in
//! top-level headings, a table of contents for long documents, and a
//! prev/next navigation footer following the tree's declared order. Files
//! are written atomically (temp + rename), UTF-8, LF line endings, final
//! newline present.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::flow::{Action, Node, SharedState, keys};
use crate::types::{AtlasError, Result};

/// Heading keyword -> emoji marker, applied to `# ` headings only
const HEADING_EMOJI: &[(&str, &str)] = &[
    ("architecture", "🏗️"),
    ("overview", "📖"),
    ("api", "📖"),
    ("dependency", "🔗"),
    ("timeline", "📅"),
    ("glossary", "📚"),
    ("quick", "🚀"),
    ("module", "📦"),
    ("documentation", "📘"),
];

/// Number of headings from which a table of contents is injected
const TOC_THRESHOLD: usize = 4;

pub struct FormatNode {
    /// Write a `.bak` sibling before overwriting an existing file
    backup_files: bool,
}

impl FormatNode {
    pub fn new(backup_files: bool) -> Self {
        Self { backup_files }
    }

    fn emoji_for(title: &str) -> Option<&'static str> {
        let lower = title.to_lowercase();
        HEADING_EMOJI
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .map(|(_, emoji)| *emoji)
    }

    fn decorate_heading(line: &str) -> String {
        let Some(title) = line.strip_prefix("# ") else {
            return line.to_string();
        };
        match Self::emoji_for(title) {
            // Already decorated headings stay as they are
            Some(emoji) if !title.starts_with(emoji) => format!("# {} {}", emoji, title),
            _ => line.to_string(),
        }
    }

    fn toc_anchor(title: &str) -> String {
        title
            .to_lowercase()
            .chars()
            .filter_map(|c| {
                if c.is_ascii_alphanumeric() {
                    Some(c)
                } else if c == ' ' || c == '-' {
                    Some('-')
                } else {
                    None
                }
            })
            .collect()
    }

    /// Insert a `## Contents` list after the first heading when the
    /// document carries enough second-level headings to warrant one.
    fn inject_toc(content: &str) -> String {
        let subheadings: Vec<&str> = content
            .lines()
            .filter_map(|l| l.strip_prefix("## "))
            .collect();
        if subheadings.len() < TOC_THRESHOLD || content.contains("## Contents") {
            return content.to_string();
        }

        let toc: String = subheadings
            .iter()
            .map(|title| format!("- [{}](#{})", title, Self::toc_anchor(title)))
            .collect::<Vec<_>>()
            .join("\n");

        let mut lines: Vec<String> = Vec::new();
        let mut injected = false;
        for line in content.lines() {
            lines.push(line.to_string());
            if !injected && line.starts_with("# ") {
                lines.push(String::new());
                lines.push("## Contents".to_string());
                lines.push(String::new());
                lines.push(toc.clone());
                injected = true;
            }
        }
        lines.join("\n")
    }

    /// Prev/next footer from the declared document order.
    fn nav_footer(order: &[String], position: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        if position > 0 {
            let prev = &order[position - 1];
            parts.push(format!("[← {}]({})", doc_title(prev), rel_link(&order[position], prev)));
        }
        if position + 1 < order.len() {
            let next = &order[position + 1];
            parts.push(format!("[{} →]({})", doc_title(next), rel_link(&order[position], next)));
        }
        if parts.is_empty() {
            return String::new();
        }
        format!("\n---\n\n{}\n", parts.join(" | "))
    }

    fn finalize(content: &str) -> String {
        let mut text = content.replace("\r\n", "\n");
        while text.ends_with("\n\n") {
            text.pop();
        }
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }

    async fn write_atomic(&self, target: &Path, content: &str) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if self.backup_files && target.exists() {
            let backup = target.with_extension("md.bak");
            if let Err(e) = tokio::fs::copy(target, &backup).await {
                warn!(path = %target.display(), error = %e, "backup failed, writing anyway");
            }
        }
        let tmp = target.with_extension("md.tmp");
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        tokio::fs::rename(&tmp, target).await?;
        Ok(())
    }
}

/// Display title for a document path: its file stem, de-slugged.
fn doc_title(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let mut title = stem.replace(['_', '-'], " ");
    if let Some(first) = title.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    title
}

/// Relative link from one document to another within the tree.
fn rel_link(from: &str, to: &str) -> String {
    let from_dir = Path::new(from).parent().unwrap_or(Path::new(""));
    let to_path = Path::new(to);
    if let Ok(stripped) = to_path.strip_prefix(from_dir) {
        return stripped.to_string_lossy().replace('\\', "/");
    }
    // One level of nesting only: hop up to the tree root
    let ups = from_dir.components().count().saturating_sub(1);
    let mut link = "../".repeat(ups);
    let root_relative: PathBuf = to_path.components().skip(1).collect();
    link.push_str(&root_relative.to_string_lossy().replace('\\', "/"));
    link
}

#[async_trait]
impl Node for FormatNode {
    fn name(&self) -> &str {
        "format"
    }

    async fn prepare(&self, state: &SharedState) -> Result<Value> {
        let documents: BTreeMap<String, String> = state
            .get(keys::FINAL_DOCUMENTS)
            .ok_or_else(|| AtlasError::Assembly("final_documents missing".into()))?;
        let output_dir = state
            .get_str(keys::OUTPUT_DIR)
            .ok_or_else(|| AtlasError::Assembly("output_dir missing".into()))?;
        Ok(json!({ "documents": documents, "output_dir": output_dir }))
    }

    async fn execute(&self, prep: Value) -> Result<Value> {
        let documents: BTreeMap<String, String> =
            serde_json::from_value(prep["documents"].clone()).unwrap_or_default();
        let output_dir = PathBuf::from(prep["output_dir"].as_str().unwrap_or("docs"));

        // Declared reading order: index, sections (BTreeMap order), modules
        let mut order: Vec<String> = Vec::new();
        order.extend(documents.keys().filter(|p| p.ends_with("/index.md") && !p.contains("/modules/")).cloned());
        order.extend(
            documents
                .keys()
                .filter(|p| !p.contains("/modules/") && !p.ends_with("/index.md"))
                .cloned(),
        );
        order.extend(documents.keys().filter(|p| p.contains("/modules/")).cloned());

        let mut written: Vec<String> = Vec::new();
        for (position, doc_path) in order.iter().enumerate() {
            let raw = &documents[doc_path];
            let decorated: String = raw
                .lines()
                .map(Self::decorate_heading)
                .collect::<Vec<_>>()
                .join("\n");
            let with_toc = Self::inject_toc(&decorated);
            let mut content = with_toc;
            content.push_str(&Self::nav_footer(&order, position));
            let content = Self::finalize(&content);

            let target = output_dir.join(doc_path);
            self.write_atomic(&target, &content).await?;
            written.push(doc_path.clone());
        }

        info!(files = written.len(), dir = %output_dir.display(), "documentation written");
        Ok(json!({ "written": written }))
    }

    async fn post(&self, state: &SharedState, _prep: Value, exec: Value) -> Result<Action> {
        state.set("process_status.files_written", &exec["written"]);
        Ok(Action::default_label())
    }
}
