//! Shared State Store
//!
//! The blackboard through which pipeline nodes exchange artifacts.
//! Keys are namespaced strings with `.` separators
//! (`ai_analysis.core_modules`); values are JSON documents so every entity
//! that derives serde can live here.
//!
//! ## Write discipline
//!
//! `execute` treats its inputs as frozen: parallel workers receive cloned
//! slices from `get`/`snapshot` and never hold references into the store.
//! `post` is the only writer and is serialized per node by the runner, so
//! a plain RwLock suffices - there is no lock ordering to get wrong.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};

use crate::types::ErrorRecord;

/// Documented blackboard keys. Producers and consumers are listed in the
/// pipeline documentation; using the constants keeps typos out of node code.
pub mod keys {
    pub const REPO_SOURCE: &str = "repo_source";
    pub const TARGET_LANGUAGE: &str = "target_language";
    pub const OUTPUT_DIR: &str = "output_dir";
    pub const LOCAL_REPO_PATH: &str = "local_repo_path";
    pub const REPO_STATS: &str = "repo_stats";
    pub const CODE_STRUCTURE: &str = "code_structure";
    pub const COMMIT_HISTORY: &str = "commit_history";
    pub const HISTORY_SUMMARY: &str = "history_summary";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const CORE_MODULES: &str = "ai_analysis.core_modules";
    pub const ARCHITECTURE_SUMMARY: &str = "ai_analysis.architecture_summary";
    pub const ANALYSIS_QUALITY: &str = "ai_analysis.quality";
    pub const RAG_CHUNKS: &str = "rag.chunks";
    pub const GENERATED_CONTENT: &str = "generated_content";
    pub const MODULE_DETAILS: &str = "generated_content.module_details";
    pub const QUALITY_SCORES: &str = "quality_scores";
    pub const MERMAID_REPORT: &str = "mermaid_report";
    pub const PROCESS_ERRORS: &str = "process_status.errors";
    pub const FINAL_DOCUMENTS: &str = "final_documents";
    pub const TOKEN_USAGE: &str = "process_status.token_usage";
}

/// The blackboard. Cheap to clone; clones share the same store.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value by dotted key, cloned out of the store.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut current: &Value = &Value::Null;
        let mut first = true;
        for part in key.split('.') {
            current = if first {
                first = false;
                guard.get(part)?
            } else {
                current.as_object()?.get(part)?
            };
        }
        Some(current.clone())
    }

    /// Read and deserialize a value by dotted key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get_value(key)?).ok()
    }

    /// Read a string value by dotted key.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get_value(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    /// Write a value under a dotted key, creating intermediate objects.
    /// Panics never; a non-object intermediate is replaced.
    pub fn set<T: Serialize>(&self, key: &str, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut parts = key.split('.').collect::<Vec<_>>();
        let leaf = parts.pop().expect("key is non-empty");

        if parts.is_empty() {
            guard.insert(leaf.to_string(), value);
            return;
        }

        let mut current = guard
            .entry(parts[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        for part in &parts[1..] {
            let obj = current.as_object_mut().expect("coerced to object above");
            current = obj
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
        }
        current
            .as_object_mut()
            .expect("coerced to object above")
            .insert(leaf.to_string(), value);
    }

    /// Append a value to the array under a dotted key, creating it if absent.
    pub fn push<T: Serialize>(&self, key: &str, value: T) {
        let mut array: Vec<Value> = self.get(key).unwrap_or_default();
        array.push(serde_json::to_value(value).unwrap_or(Value::Null));
        self.set(key, array);
    }

    /// Record a pipeline error under `process_status.errors`.
    pub fn record_error(&self, record: ErrorRecord) {
        self.push(keys::PROCESS_ERRORS, record);
    }

    /// All recorded errors, empty when none.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.get(keys::PROCESS_ERRORS).unwrap_or_default()
    }

    /// Clone the entire store; used to hand frozen snapshots to workers.
    pub fn snapshot(&self) -> Value {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Value::Object(guard.clone())
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("SharedState")
            .field("keys", &guard.keys().collect::<Vec<_>>())
            .finish()
    }
}
