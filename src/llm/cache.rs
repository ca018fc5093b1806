//! LLM Response Cache
//!
//! On-disk cache keyed by a stable hash of (full prompt, model id,
//! temperature, max_tokens). Entries live under `<cache_dir>/llm/<hash>.json`
//! as `{ response, metadata, created_at }` and expire after the configured
//! TTL. Writes are serialized by a lock; reads take a stable snapshot of the
//! file without locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::Result;

/// One cached response with its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: String,
    pub metadata: CacheEntryMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Disk-backed response cache
pub struct LlmCache {
    dir: PathBuf,
    ttl_secs: u64,
    enabled: bool,
    write_lock: Mutex<()>,
}

impl LlmCache {
    /// Cache rooted at `<cache_dir>/llm/`.
    pub fn new(cache_dir: &Path, ttl_secs: u64, enabled: bool) -> Self {
        Self {
            dir: cache_dir.join("llm"),
            ttl_secs,
            enabled,
            write_lock: Mutex::new(()),
        }
    }

    /// Stable key over everything that determines the response.
    pub fn key(full_prompt: &str, model: &str, temperature: f32, max_tokens: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(full_prompt.as_bytes());
        hasher.update(b"\x00");
        hasher.update(model.as_bytes());
        hasher.update(b"\x00");
        hasher.update(format!("{:.3}", temperature).as_bytes());
        hasher.update(b"\x00");
        hasher.update(max_tokens.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Look up a fresh entry. Stale and unreadable entries miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let path = self.entry_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                return None;
            }
        };

        let age = Utc::now()
            .signed_duration_since(entry.created_at)
            .num_seconds();
        if age < 0 || age as u64 >= self.ttl_secs {
            debug!(key, age, "cache entry expired");
            return None;
        }

        debug!(key, "llm cache hit");
        Some(entry)
    }

    /// Store a response. Failures are logged, never propagated - a broken
    /// cache must not fail the call that produced the response.
    pub async fn put(&self, key: &str, response: &str, metadata: CacheEntryMetadata) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry {
            response: response.to_string(),
            metadata,
            created_at: Utc::now(),
        };

        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.write_entry(key, &entry).await {
            warn!(key, error = %e, "failed to write llm cache entry");
        }
    }

    async fn write_entry(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entry)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove every cached entry.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().extension().is_some_and(|e| e == "json")
                && tokio::fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> CacheEntryMetadata {
        CacheEntryMetadata {
            provider: "stub".into(),
            model: "stub/model".into(),
            input_tokens: 10,
            output_tokens: 5,
        }
    }

    #[test]
    fn test_key_is_stable_and_sensitive() {
        let a = LlmCache::key("prompt", "openai/gpt-4o-mini", 0.2, 4096);
        let b = LlmCache::key("prompt", "openai/gpt-4o-mini", 0.2, 4096);
        assert_eq!(a, b);

        assert_ne!(a, LlmCache::key("prompt!", "openai/gpt-4o-mini", 0.2, 4096));
        assert_ne!(a, LlmCache::key("prompt", "openai/gpt-4o", 0.2, 4096));
        assert_ne!(a, LlmCache::key("prompt", "openai/gpt-4o-mini", 0.7, 4096));
        assert_ne!(a, LlmCache::key("prompt", "openai/gpt-4o-mini", 0.2, 2048));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path(), 3600, true);

        let key = LlmCache::key("p", "m", 0.2, 100);
        assert!(cache.get(&key).await.is_none());

        cache.put(&key, "the response", metadata()).await;
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.response, "the response");
        assert_eq!(hit.metadata.provider, "stub");
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path(), 0, true);

        let key = LlmCache::key("p", "m", 0.2, 100);
        cache.put(&key, "soon stale", metadata()).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path(), 3600, false);

        let key = LlmCache::key("p", "m", 0.2, 100);
        cache.put(&key, "ignored", metadata()).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path(), 3600, true);

        cache.put(&LlmCache::key("a", "m", 0.2, 1), "a", metadata()).await;
        cache.put(&LlmCache::key("b", "m", 0.2, 1), "b", metadata()).await;
        assert_eq!(cache.clear().await.unwrap(), 2);
    }
}
