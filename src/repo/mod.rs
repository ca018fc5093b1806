//! Repository Access
//!
//! Clone-with-cache preparation and commit history analysis, both through
//! the `git` CLI.

mod fetch;
mod history;

pub use fetch::{Credentials, PreparedRepo, RepoFetcher, RepoSource};
pub use history::HistoryAnalyzer;
