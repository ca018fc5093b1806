//! Commit History Analysis
//!
//! Reads up to `max_commits` commits in reverse chronological order via the
//! `git` CLI and derives per-author contribution counts, a coarse
//! year/quarter timeline, and the most-changed files. The LLM narrative is
//! produced by the history node, not here.

use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::constants;
use crate::types::{AtlasError, CommitRecord, HistorySummary, Result};

/// Record separator emitted in the pretty format so subjects containing
/// newlines cannot break parsing.
const COMMIT_MARKER: &str = "\x1e";
const FIELD_SEPARATOR: &str = "\x1f";

/// Derives history artifacts from a working tree.
pub struct HistoryAnalyzer {
    max_commits: usize,
}

impl HistoryAnalyzer {
    pub fn new(max_commits: usize) -> Self {
        Self { max_commits }
    }

    /// Read the log and derive the summary. Ordered newest-first.
    pub async fn analyze(&self, repo_path: &Path) -> Result<(Vec<CommitRecord>, HistorySummary)> {
        let format = format!(
            "{}%H{}%an{}%aI{}%s",
            COMMIT_MARKER, FIELD_SEPARATOR, FIELD_SEPARATOR, FIELD_SEPARATOR
        );
        let limit = format!("-n{}", self.max_commits);
        let pretty = format!("--pretty=format:{}", format);
        let output = Command::new("git")
            .current_dir(repo_path)
            .args(["log", limit.as_str(), pretty.as_str(), "--numstat"])
            .output()
            .await
            .map_err(|e| AtlasError::git("log", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AtlasError::git("log", stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let commits = parse_log(&text);
        debug!(commits = commits.len(), "history parsed");

        let summary = summarize(&commits);
        Ok((commits, summary))
    }
}

fn parse_log(text: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();

    for block in text.split(COMMIT_MARKER) {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let mut lines = block.lines();
        let Some(header) = lines.next() else {
            continue;
        };
        let fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
        if fields.len() != 4 {
            continue;
        }

        let timestamp = DateTime::parse_from_rfc3339(fields[2])
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let mut changed_files = Vec::new();
        let mut insertions = 0usize;
        let mut deletions = 0usize;
        for line in lines {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() != 3 {
                continue;
            }
            // Binary files report "-" for both counts
            insertions += cols[0].parse::<usize>().unwrap_or(0);
            deletions += cols[1].parse::<usize>().unwrap_or(0);
            changed_files.push(cols[2].to_string());
        }

        commits.push(CommitRecord {
            sha: fields[0].to_string(),
            author: fields[1].to_string(),
            timestamp,
            subject: fields[3].to_string(),
            changed_files,
            insertions,
            deletions,
        });
    }

    commits
}

fn summarize(commits: &[CommitRecord]) -> HistorySummary {
    let mut contributions: BTreeMap<String, usize> = BTreeMap::new();
    let mut timeline_buckets: BTreeMap<String, usize> = BTreeMap::new();
    let mut file_changes: BTreeMap<String, usize> = BTreeMap::new();

    for commit in commits {
        *contributions.entry(commit.author.clone()).or_insert(0) += 1;

        let quarter = (commit.timestamp.month() - 1) / 3 + 1;
        let bucket = format!("{}-Q{}", commit.timestamp.year(), quarter);
        *timeline_buckets.entry(bucket).or_insert(0) += 1;

        for file in &commit.changed_files {
            *file_changes.entry(file.clone()).or_insert(0) += 1;
        }
    }

    let mut top_changed_files: Vec<(String, usize)> = file_changes.into_iter().collect();
    top_changed_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_changed_files.truncate(constants::repo::TOP_CHANGED_FILES);

    HistorySummary {
        contributions,
        timeline_buckets,
        top_changed_files,
        narrative: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) -> bool {
        StdCommand::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test Author")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test Author")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn init_repo_with_commits(dir: &Path) -> bool {
        if !git(dir, &["init", "-q", "-b", "main"]) {
            return false;
        }
        std::fs::write(dir.join("a.txt"), "one\n").unwrap();
        if !git(dir, &["add", "."]) || !git(dir, &["commit", "-q", "-m", "first commit"]) {
            return false;
        }
        std::fs::write(dir.join("a.txt"), "one\ntwo\n").unwrap();
        std::fs::write(dir.join("b.txt"), "bee\n").unwrap();
        git(dir, &["add", "."]) && git(dir, &["commit", "-q", "-m", "second commit"])
    }

    #[tokio::test]
    async fn test_analyze_real_repo() {
        let dir = tempfile::tempdir().unwrap();
        if !init_repo_with_commits(dir.path()) {
            // git unavailable in this environment
            return;
        }

        let analyzer = HistoryAnalyzer::new(100);
        let (commits, summary) = analyzer.analyze(dir.path()).await.unwrap();

        assert_eq!(commits.len(), 2);
        // Newest first
        assert_eq!(commits[0].subject, "second commit");
        assert_eq!(commits[1].subject, "first commit");
        assert!(commits[0].changed_files.contains(&"b.txt".to_string()));
        assert!(commits[0].insertions >= 2);

        assert_eq!(summary.contributions.get("Test Author"), Some(&2));
        assert_eq!(summary.timeline_buckets.values().sum::<usize>(), 2);
        assert_eq!(summary.top_changed_files[0].0, "a.txt");
    }

    #[tokio::test]
    async fn test_max_commits_respected() {
        let dir = tempfile::tempdir().unwrap();
        if !init_repo_with_commits(dir.path()) {
            return;
        }

        let analyzer = HistoryAnalyzer::new(1);
        let (commits, _) = analyzer.analyze(dir.path()).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].subject, "second commit");
    }

    #[test]
    fn test_parse_log_tolerates_binary_numstat() {
        let text = format!(
            "{}abc123{}Ann{}2024-03-05T10:00:00+00:00{}add image\n-\t-\tlogo.png\n3\t1\tsrc/app.py",
            COMMIT_MARKER, FIELD_SEPARATOR, FIELD_SEPARATOR, FIELD_SEPARATOR
        );
        let commits = parse_log(&text);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].insertions, 3);
        assert_eq!(commits[0].deletions, 1);
        assert_eq!(commits[0].changed_files.len(), 2);
    }

    #[test]
    fn test_quarter_buckets() {
        let commits = vec![
            CommitRecord {
                sha: "a".into(),
                author: "x".into(),
                timestamp: "2024-01-15T00:00:00Z".parse().unwrap(),
                subject: "jan".into(),
                changed_files: vec![],
                insertions: 0,
                deletions: 0,
            },
            CommitRecord {
                sha: "b".into(),
                author: "x".into(),
                timestamp: "2024-11-20T00:00:00Z".parse().unwrap(),
                subject: "nov".into(),
                changed_files: vec![],
                insertions: 0,
                deletions: 0,
            },
        ];
        let summary = summarize(&commits);
        assert_eq!(summary.timeline_buckets.get("2024-Q1"), Some(&1));
        assert_eq!(summary.timeline_buckets.get("2024-Q4"), Some(&1));
    }
}
