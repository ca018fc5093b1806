//! Language Detection
//!
//! Detection order: file extension, then shebang, then a content sniff.
//! Unknown languages and binary payloads are skipped by the parser.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Shell,
    Markdown,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Ruby => "ruby",
            Self::Shell => "shell",
            Self::Markdown => "markdown",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_code(&self) -> bool {
        !matches!(self, Self::Markdown | Self::Unknown)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn from_extension(ext: &str) -> Language {
    match ext {
        "rs" => Language::Rust,
        "py" | "pyi" => Language::Python,
        "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
        "ts" | "tsx" | "mts" => Language::TypeScript,
        "go" => Language::Go,
        "java" => Language::Java,
        "c" | "h" => Language::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
        "rb" | "rake" => Language::Ruby,
        "sh" | "bash" | "zsh" => Language::Shell,
        "md" | "markdown" => Language::Markdown,
        _ => Language::Unknown,
    }
}

fn from_shebang(line: &str) -> Language {
    if !line.starts_with("#!") {
        return Language::Unknown;
    }
    let line = line.to_lowercase();
    if line.contains("python") {
        Language::Python
    } else if line.contains("node") {
        Language::JavaScript
    } else if line.contains("ruby") {
        Language::Ruby
    } else if line.contains("bash") || line.contains("/sh") || line.contains("zsh") {
        Language::Shell
    } else {
        Language::Unknown
    }
}

/// Last-ditch sniff over the first lines of content.
fn from_content(content: &str) -> Language {
    let head: String = content.lines().take(30).collect::<Vec<_>>().join("\n");
    if head.contains("fn main()") || head.contains("pub fn ") || head.contains("use std::") {
        Language::Rust
    } else if head.contains("def ") && head.contains("import ") {
        Language::Python
    } else if head.contains("package main") || head.contains("func ") {
        Language::Go
    } else if head.contains("public class ") {
        Language::Java
    } else {
        Language::Unknown
    }
}

/// Detect the language of a file from its name and content.
pub fn detect_language(path: &str, content: &str) -> Language {
    if let Some(ext) = path.rsplit('.').next().filter(|e| *e != path) {
        let by_ext = from_extension(&ext.to_lowercase());
        if by_ext != Language::Unknown {
            return by_ext;
        }
    }

    if let Some(first_line) = content.lines().next() {
        let by_shebang = from_shebang(first_line);
        if by_shebang != Language::Unknown {
            return by_shebang;
        }
    }

    from_content(content)
}

/// Binary payload check: any NUL in the leading bytes.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}
