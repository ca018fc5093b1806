//! Source Parsing
//!
//! Line-oriented extraction of imports, top-level declared symbols, and a
//! short leading-comment summary per file. This intentionally stops far
//! short of real parsing: the consumers are documentation prompts and the
//! module dependency graph, both of which only need names.

use regex::Regex;
use std::sync::OnceLock;

use super::language::{Language, detect_language, looks_binary};
use crate::types::FileEntry;

/// Parse one file into a [`FileEntry`]. Binary payloads and unknown
/// languages produce an entry with `is_binary` / empty extraction so the
/// caller can record the skip.
pub fn parse_file(rel_path: &str, bytes: &[u8], binary_by_extension: bool) -> FileEntry {
    if binary_by_extension || looks_binary(bytes) {
        return FileEntry {
            path: rel_path.to_string(),
            language: Language::Unknown.as_str().to_string(),
            size_bytes: bytes.len() as u64,
            is_binary: true,
            summary: None,
            imports: Vec::new(),
            exported_symbols: Vec::new(),
        };
    }

    let content = String::from_utf8_lossy(bytes);
    let language = detect_language(rel_path, &content);

    let (imports, symbols) = match language {
        Language::Rust => (extract_rust_imports(&content), extract_rust_symbols(&content)),
        Language::Python => (
            extract_python_imports(&content),
            extract_python_symbols(&content),
        ),
        Language::JavaScript | Language::TypeScript => (
            extract_js_imports(&content),
            extract_js_symbols(&content),
        ),
        Language::Go => (extract_go_imports(&content), extract_go_symbols(&content)),
        Language::Java => (extract_java_imports(&content), extract_java_symbols(&content)),
        Language::C | Language::Cpp => (extract_c_includes(&content), extract_c_symbols(&content)),
        Language::Ruby => (extract_ruby_imports(&content), extract_ruby_symbols(&content)),
        Language::Shell => (extract_shell_sources(&content), Vec::new()),
        Language::Markdown | Language::Unknown => (Vec::new(), Vec::new()),
    };

    FileEntry {
        path: rel_path.to_string(),
        language: language.as_str().to_string(),
        size_bytes: bytes.len() as u64,
        is_binary: false,
        summary: leading_comment_summary(&content, language),
        imports,
        exported_symbols: symbols,
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// First docstring or leading comment, collapsed to one line.
fn leading_comment_summary(content: &str, language: Language) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();

    match language {
        Language::Python => {
            // Module docstring
            let trimmed = content.trim_start();
            for quote in ["\"\"\"", "'''"] {
                if let Some(rest) = trimmed.strip_prefix(quote)
                    && let Some(end) = rest.find(quote)
                {
                    parts.push(rest[..end].trim());
                }
            }
        }
        _ => {}
    }

    if parts.is_empty() {
        for line in content.lines().take(10) {
            let line = line.trim();
            if let Some(text) = line
                .strip_prefix("//!")
                .or_else(|| line.strip_prefix("///"))
                .or_else(|| line.strip_prefix("//"))
                .or_else(|| line.strip_prefix("#").filter(|_| language != Language::Markdown))
            {
                let text = text.trim();
                if !text.is_empty() && !text.starts_with('!') {
                    parts.push(text);
                }
            } else if !line.is_empty() {
                break;
            }
        }
    }

    let summary = parts.join(" ").trim().to_string();
    if summary.is_empty() {
        None
    } else {
        Some(summary.chars().take(200).collect())
    }
}

// =============================================================================
// Per-Language Extraction
// =============================================================================

fn collect_captures(content: &str, pattern: &'static OnceLock<Regex>, raw: &str) -> Vec<String> {
    let re = pattern.get_or_init(|| Regex::new(raw).expect("static regex compiles"));
    let mut out: Vec<String> = re
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    out.sort();
    out.dedup();
    out
}

fn extract_rust_imports(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(content, &RE, r"(?m)^\s*(?:pub\s+)?use\s+([A-Za-z_][A-Za-z0-9_]*)")
}

fn extract_rust_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^\s*pub\s+(?:async\s+)?(?:fn|struct|enum|trait|mod|const|static|type)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
}

fn extract_python_imports(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^\s*(?:from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import|import\s+([A-Za-z_][A-Za-z0-9_.]*))",
    )
    .into_iter()
    .chain({
        static RE2: OnceLock<Regex> = OnceLock::new();
        collect_captures(content, &RE2, r"(?m)^\s*import\s+([A-Za-z_][A-Za-z0-9_.]*)")
    })
    .map(|m| m.split('.').next().unwrap_or(&m).to_string())
    .collect::<std::collections::BTreeSet<_>>()
    .into_iter()
    .collect()
}

fn extract_python_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^(?:def|class)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .into_iter()
    .filter(|s| !s.starts_with('_'))
    .collect()
}

fn extract_js_imports(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let mut imports = collect_captures(
        content,
        &RE,
        r#"(?m)^\s*import\s+(?:[^'"]*\s+from\s+)?['"]([^'"]+)['"]"#,
    );
    static RE2: OnceLock<Regex> = OnceLock::new();
    imports.extend(collect_captures(
        content,
        &RE2,
        r#"require\(['"]([^'"]+)['"]\)"#,
    ));
    imports.sort();
    imports.dedup();
    imports
}

fn extract_js_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
}

fn extract_go_imports(content: &str) -> Vec<String> {
    static SINGLE: OnceLock<Regex> = OnceLock::new();
    let mut imports = collect_captures(content, &SINGLE, r#"(?m)^\s*import\s+"([^"]+)""#);

    // Grouped import block
    if let Some(start) = content.find("import (")
        && let Some(end) = content[start..].find(')')
    {
        static GROUPED: OnceLock<Regex> = OnceLock::new();
        imports.extend(collect_captures(
            &content[start..start + end],
            &GROUPED,
            r#""([^"]+)""#,
        ));
    }
    imports.sort();
    imports.dedup();
    imports
}

fn extract_go_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^func\s+(?:\([^)]*\)\s+)?([A-Z][A-Za-z0-9_]*)",
    )
}

fn extract_java_imports(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(content, &RE, r"(?m)^\s*import\s+([A-Za-z_][A-Za-z0-9_.]*);")
}

fn extract_java_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^\s*public\s+(?:final\s+|abstract\s+)?(?:class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
}

fn extract_c_includes(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(content, &RE, r#"(?m)^\s*#include\s+[<"]([^>"]+)[>"]"#)
}

fn extract_c_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r"(?m)^(?:[A-Za-z_][A-Za-z0-9_*\s]+\s+)([A-Za-z_][A-Za-z0-9_]*)\s*\([^;]*$",
    )
}

fn extract_ruby_imports(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(
        content,
        &RE,
        r#"(?m)^\s*require(?:_relative)?\s+['"]([^'"]+)['"]"#,
    )
}

fn extract_ruby_symbols(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(content, &RE, r"(?m)^\s*(?:class|module|def)\s+([A-Za-z_][A-Za-z0-9_]*)")
}

fn extract_shell_sources(content: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    collect_captures(content, &RE, r"(?m)^\s*(?:source|\.)\s+([^\s;]+)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_extraction() {
        let source = r#"//! Engine internals.

use std::collections::HashMap;
use serde::Serialize;

pub struct Engine;

pub fn start(map: HashMap<String, String>) {}

fn private_helper() {}
"#;
        let entry = parse_file("src/engine.rs", source.as_bytes(), false);
        assert_eq!(entry.language, "rust");
        assert_eq!(entry.imports, vec!["serde", "std"]);
        assert_eq!(entry.exported_symbols, vec!["Engine", "start"]);
        assert_eq!(entry.summary.as_deref(), Some("Engine internals."));
    }

    #[test]
    fn test_python_extraction() {
        let source = r#""""Utilities for the scheduler."""
import os
import os.path
from collections import defaultdict

def schedule(jobs):
    pass

def _hidden():
    pass

class Scheduler:
    pass
"#;
        let entry = parse_file("scheduler.py", source.as_bytes(), false);
        assert_eq!(entry.language, "python");
        assert!(entry.imports.contains(&"os".to_string()));
        assert!(entry.imports.contains(&"collections".to_string()));
        assert_eq!(entry.exported_symbols, vec!["Scheduler", "schedule"]);
        assert_eq!(entry.summary.as_deref(), Some("Utilities for the scheduler."));
    }

    #[test]
    fn test_typescript_extraction() {
        let source = r#"// HTTP client wrapper
import { request } from "./transport";
import axios from "axios";

export class Client {}
export function get(url: string) {}
"#;
        let entry = parse_file("src/client.ts", source.as_bytes(), false);
        assert_eq!(entry.language, "typescript");
        assert_eq!(entry.imports, vec!["./transport", "axios"]);
        assert_eq!(entry.exported_symbols, vec!["Client", "get"]);
    }

    #[test]
    fn test_go_grouped_imports() {
        let source = r#"package server

import (
    "fmt"
    "net/http"
)

func Serve() {}
func internal() {}
"#;
        let entry = parse_file("server.go", source.as_bytes(), false);
        assert_eq!(entry.imports, vec!["fmt", "net/http"]);
        assert_eq!(entry.exported_symbols, vec!["Serve"]);
    }

    #[test]
    fn test_binary_detection() {
        let entry = parse_file("logo.png", &[0x89, 0x50, 0x00, 0x47], false);
        assert!(entry.is_binary);
        assert!(entry.imports.is_empty());

        let by_ext = parse_file("data.bin", b"text actually", true);
        assert!(by_ext.is_binary);
    }

    #[test]
    fn test_unknown_language_yields_empty_extraction() {
        let entry = parse_file("notes.txt", b"some notes about nothing in particular", false);
        assert_eq!(entry.language, "unknown");
        assert!(entry.imports.is_empty());
        assert!(entry.exported_symbols.is_empty());
    }
}
