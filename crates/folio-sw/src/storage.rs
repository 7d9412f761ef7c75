//! [`CacheStorage`] backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheKey, CacheStorage, CacheStore};
use crate::CacheError;

// ==================== Memory ====================

/// In-memory storage. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    store: RwLock<CacheStore>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing store.
    pub fn with_store(store: CacheStore) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> CacheStore {
        self.store.read().await.clone()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.store.write().await.open(name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.store.read().await.has(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.store.write().await.delete(name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.store.read().await.keys())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut store = self.store.write().await;
        let cache = store
            .get_mut(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        cache.put(entry);
        Ok(())
    }

    async fn match_in(
        &self,
        name: &str,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let store = self.store.read().await;
        Ok(store
            .get(name)
            .and_then(|c| c.match_request(key))
            .cloned())
    }

    async fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.store.read().await.match_request(key).cloned())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let store = self.store.read().await;
        let cache = store
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        Ok(cache.entries().cloned().collect())
    }
}

// ==================== File ====================

/// Storage persisted as one JSON document.
///
/// Every mutation is applied to a copy, written to a sibling temp file and
/// renamed over the document; the in-memory copy is only replaced once the
/// rename succeeded.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    store: Mutex<CacheStore>,
}

impl FileStorage {
    /// Open the document at `path`. A missing file is an empty store.
    pub async fn open_at(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let store = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache document yet, starting empty");
                CacheStore::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), "Cache storage opened");

        Ok(Self {
            path,
            store: Mutex::new(store),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, store: &CacheStore) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_vec(store)?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the store and commit it if it reports a
    /// modification.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut CacheStore) -> Result<(T, bool), CacheError>,
    ) -> Result<T, CacheError> {
        let mut current = self.store.lock().await;
        let mut next = current.clone();
        let (value, modified) = change(&mut next)?;
        if modified {
            self.persist(&next).await?;
            *current = next;
        }
        Ok(value)
    }
}

#[async_trait]
impl CacheStorage for FileStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.mutate(|store| {
            let created = !store.has(name);
            store.open(name);
            Ok(((), created))
        })
        .await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.store.lock().await.has(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.mutate(|store| {
            let deleted = store.delete(name);
            Ok((deleted, deleted))
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.store.lock().await.keys())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.mutate(|store| {
            let cache = store
                .get_mut(name)
                .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
            cache.put(entry);
            Ok(((), true))
        })
        .await
    }

    async fn match_in(
        &self,
        name: &str,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let store = self.store.lock().await;
        Ok(store
            .get(name)
            .and_then(|c| c.match_request(key))
            .cloned())
    }

    async fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.store.lock().await.match_request(key).cloned())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let store = self.store.lock().await;
        let cache = store
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        Ok(cache.entries().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use url::Url;

    fn entry(path: &str, body: &str) -> CacheEntry {
        CacheEntry {
            url: format!("https://patrickprunty.com{path}"),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            cached_at: 0,
        }
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::get(&Url::parse(&format!("https://patrickprunty.com{path}")).unwrap())
    }

    #[tokio::test]
    async fn test_memory_put_requires_open_cache() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.put("v9", entry("/", "home")).await,
            Err(CacheError::NotFound(_))
        ));

        storage.open("v9").await.unwrap();
        storage.put("v9", entry("/", "home")).await.unwrap();
        assert!(storage.match_in("v9", &key("/")).await.unwrap().is_some());
        assert!(storage.match_in("v8", &key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_delete_and_keys() {
        let storage = MemoryStorage::new();
        storage.open("v8").await.unwrap();
        storage.open("v9").await.unwrap();

        assert!(storage.delete("v8").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["v9".to_string()]);
        assert!(!storage.has("v8").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches").join("cache-storage.json");

        {
            let storage = FileStorage::open_at(&path).await.unwrap();
            storage.open("v9").await.unwrap();
            storage.put("v9", entry("/photography", "gallery")).await.unwrap();
        }

        let reopened = FileStorage::open_at(&path).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec!["v9".to_string()]);
        let hit = reopened.match_any(&key("/photography")).await.unwrap().unwrap();
        assert_eq!(hit.body, b"gallery");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_storage_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open_at(dir.path().join("none.json")).await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
        // Nothing was modified, nothing was written.
        assert!(!storage.path().exists());
    }

    #[tokio::test]
    async fn test_file_storage_failed_put_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open_at(dir.path().join("s.json")).await.unwrap();

        assert!(storage.put("v9", entry("/", "home")).await.is_err());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            FileStorage::open_at(&path).await,
            Err(CacheError::Serialization(_))
        ));
    }
}
