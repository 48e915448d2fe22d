//! Time-expiring key/value stores backing the explanation cache

use crate::error::{OptimizerError, Result};
use crate::model::write_atomic;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Cached text for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            created_at,
        }
    }

    /// An entry is expired once `ttl` has fully elapsed since creation
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }
}

/// Storage for cache entries.
///
/// Implementations only store and retrieve; expiry policy is applied by the
/// caller through [`CacheEntry::is_expired`] and `purge_expired`.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop every entry expired at `now`; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryExpiringStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryExpiringStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ExpiringStore for MemoryExpiringStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now, ttl));
        Ok(before - entries.len())
    }
}

/// File-backed store: one JSON document rewritten atomically on every change
#[derive(Debug)]
pub struct FileExpiringStore {
    path: PathBuf,
    entries: Mutex<Option<HashMap<String, CacheEntry>>>,
}

const CACHE_FILE: &str = "explanations.json";

impl FileExpiringStore {
    /// Store under `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(CACHE_FILE),
            entries: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> HashMap<String, CacheEntry> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read explanation cache, starting empty");
                return HashMap::new();
            }
        };
        match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
            Ok(list) => list.into_iter().map(|e| (e.key.clone(), e)).collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt explanation cache, starting empty");
                HashMap::new()
            }
        }
    }

    fn write_file(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        let mut list: Vec<&CacheEntry> = entries.values().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        let bytes = serde_json::to_vec_pretty(&list)?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| OptimizerError::Store(format!("cannot write {}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), entries = list.len(), "Wrote explanation cache");
        Ok(())
    }
}

#[async_trait]
impl ExpiringStore for FileExpiringStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut guard = self.entries.lock().await;
        let entries = guard.get_or_insert_with(|| self.read_file());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = guard.get_or_insert_with(|| self.read_file());
        entries.insert(entry.key.clone(), entry);
        self.write_file(entries)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = guard.get_or_insert_with(|| self.read_file());
        if entries.remove(key).is_some() {
            self.write_file(entries)?;
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let mut guard = self.entries.lock().await;
        let entries = guard.get_or_insert_with(|| self.read_file());
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now, ttl));
        let removed = before - entries.len();
        if removed > 0 {
            self.write_file(entries)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expiry_boundary() {
        let created = Utc::now();
        let entry = CacheEntry::new("k", "text", created);
        let ttl = Duration::days(7);
        assert!(!entry.is_expired(created, ttl));
        assert!(!entry.is_expired(created + Duration::days(7) - Duration::seconds(1), ttl));
        assert!(entry.is_expired(created + Duration::days(7), ttl));
    }

    #[tokio::test]
    async fn test_memory_store_purge() {
        let store = MemoryExpiringStore::new();
        let now = Utc::now();
        store.put(CacheEntry::new("old", "a", now - Duration::days(8))).await.unwrap();
        store.put(CacheEntry::new("new", "b", now)).await.unwrap();

        assert_eq!(store.purge_expired(now, Duration::days(7)).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(store.get("new").await.unwrap().unwrap().text, "b");
        store.remove("new").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        {
            let store = FileExpiringStore::new(dir.path()).unwrap();
            store.put(CacheEntry::new("inst-1", "explained", now)).await.unwrap();
        }
        let reopened = FileExpiringStore::new(dir.path()).unwrap();
        let entry = reopened.get("inst-1").await.unwrap().unwrap();
        assert_eq!(entry.text, "explained");
        assert_eq!(entry.created_at, now);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileExpiringStore::new(dir.path()).unwrap();
        fs::write(store.path(), b"{not json").unwrap();

        assert!(store.get("inst-1").await.unwrap().is_none());
        store.put(CacheEntry::new("inst-1", "fresh", Utc::now())).await.unwrap();
        let reopened = FileExpiringStore::new(dir.path()).unwrap();
        assert!(reopened.get("inst-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_purge_rewrites() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let store = FileExpiringStore::new(dir.path()).unwrap();
        store.put(CacheEntry::new("old", "a", now - Duration::days(30))).await.unwrap();
        store.put(CacheEntry::new("new", "b", now)).await.unwrap();
        assert_eq!(store.purge_expired(now, Duration::days(7)).await.unwrap(), 1);

        let reopened = FileExpiringStore::new(dir.path()).unwrap();
        assert!(reopened.get("old").await.unwrap().is_none());
        assert!(reopened.get("new").await.unwrap().is_some());
    }
}
