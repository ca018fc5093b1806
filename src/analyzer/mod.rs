//! Source Tree Analysis
//!
//! Scanning, language detection, line-oriented parsing, the module
//! dependency graph, and RAG chunk preparation.

mod chunker;
mod dependency;
mod language;
mod parser;
mod scanner;

pub use chunker::{ChunkOptions, chunk_text};
pub use dependency::{DependencyGraph, EXTERNAL_MODULE};
pub use language::{Language, detect_language, looks_binary};
pub use parser::parse_file;
pub use scanner::{FileScanner, ScannedFile};

/// Map a file path to its module name: the first path segment for nested
/// files, the stem for top-level files.
pub fn module_of_path(rel_path: &str) -> String {
    let normalized = rel_path.replace('\\', "/");
    match normalized.split_once('/') {
        Some((first, _)) => first.to_string(),
        None => normalized
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or(normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_of_path() {
        assert_eq!(module_of_path("src/parser/mod.rs"), "src");
        assert_eq!(module_of_path("main.py"), "main");
        assert_eq!(module_of_path("Makefile"), "Makefile");
    }
}
