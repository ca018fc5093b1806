//! Working Tree Scanner
//!
//! Walks a repository honoring `.gitignore`, the configured ignore patterns,
//! and the binary extension list. Produces the candidate file list handed to
//! the parse batches.

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ParseConfig;
use crate::constants;
use crate::types::{AtlasError, Result};

/// One scan hit, before parsing
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the scan root, with forward slashes
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size_bytes: u64,
    /// Extension is on the configured binary list
    pub binary_by_extension: bool,
}

/// File scanner configured from [`ParseConfig`].
pub struct FileScanner {
    config: ParseConfig,
}

impl FileScanner {
    pub fn new(config: ParseConfig) -> Self {
        Self { config }
    }

    /// Scan the tree rooted at `root`. Stops at `max_files`; oversize files
    /// are skipped outright.
    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedFile>> {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in &self.config.ignore_patterns {
            // Override patterns are whitelist-style; '!' negates into ignore.
            let negated = format!("!{}", pattern);
            if overrides.add(&negated).is_err() {
                warn!(pattern, "skipping unparseable ignore pattern");
            }
        }
        let overrides = overrides
            .build()
            .map_err(|e| AtlasError::Config(format!("bad ignore patterns: {}", e)))?;

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .overrides(overrides)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "walk error, skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            if files.len() >= self.config.max_files {
                warn!(max_files = self.config.max_files, "file cap reached, truncating scan");
                break;
            }

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size_bytes > constants::parse::MAX_FILE_SIZE {
                debug!(path = %entry.path().display(), size_bytes, "skipping oversize file");
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            let extension = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            let binary_by_extension = self
                .config
                .binary_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&extension));

            files.push(ScannedFile {
                rel_path,
                abs_path: entry.into_path(),
                size_bytes,
                binary_by_extension,
            });
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", b"fn main() {}");
        write(dir.path(), "README.md", b"# hi");

        let scanner = FileScanner::new(ParseConfig::default());
        let files = scanner.scan(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn test_ignore_patterns_respected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", b"pub fn x() {}");
        write(dir.path(), "node_modules/dep/index.js", b"module.exports = 1;");

        let scanner = FileScanner::new(ParseConfig::default());
        let files = scanner.scan(dir.path()).unwrap();
        assert!(files.iter().all(|f| !f.rel_path.starts_with("node_modules")));
        assert!(files.iter().any(|f| f.rel_path == "src/lib.rs"));
    }

    #[test]
    fn test_binary_extension_flagged() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "logo.png", &[0x89, 0x50, 0x4e, 0x47]);
        write(dir.path(), "main.py", b"print('hi')");

        let scanner = FileScanner::new(ParseConfig::default());
        let files = scanner.scan(dir.path()).unwrap();
        let logo = files.iter().find(|f| f.rel_path == "logo.png").unwrap();
        assert!(logo.binary_by_extension);
        let code = files.iter().find(|f| f.rel_path == "main.py").unwrap();
        assert!(!code.binary_by_extension);
    }

    #[test]
    fn test_max_files_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(dir.path(), &format!("f{}.txt", i), b"x");
        }

        let config = ParseConfig {
            max_files: 4,
            ..Default::default()
        };
        let scanner = FileScanner::new(config);
        let files = scanner.scan(dir.path()).unwrap();
        assert_eq!(files.len(), 4);
    }
}
