//! Cache storage model.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache ("my-nextjs-pwa-cache-v9")
//!             └── CacheKey (GET https://…/photography) → CacheEntry
//! ```
//!
//! [`CacheStore`] is the plain data model. Backends in [`crate::storage`]
//! wrap it behind the async [`CacheStorage`] trait.

use std::fmt;

use async_trait::async_trait;
use folio_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::CacheError;

// ==================== Keys ====================

/// Request identity: method plus URL, fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{} {}", method.as_str(), url))
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ==================== Entries ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL, fragment removed.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot `response` as the stored answer to `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: url.to_string(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body().to_vec(),
            cached_at: folio_common::now_millis(),
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey(format!("{} {}", self.method, self.url))
    }

    /// Rebuild a response from the stored entry.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url)
            .map_err(|e| CacheError::InvalidEntry(format!("{}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| CacheError::InvalidEntry(format!("{}: {e}", self.url)))?;

        let mut response = Response::new(url, status).with_body(self.body.clone());
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(n), Ok(v)) => {
                    response.headers.append(n, v);
                }
                _ => trace!(header = %name, "Dropping unrepresentable cached header"),
            }
        }
        Ok(response)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A single named cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous entry for the same key.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<&CacheKey> {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Store ====================

/// Every named cache, in creation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStore {
    caches: Vec<Cache>,
}

impl CacheStore {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.caches.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[index]
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.iter_mut().find(|c| c.name == name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.caches.len();
        self.caches.retain(|c| c.name != name);
        self.caches.len() != before
    }

    /// Get all cache names, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.caches.iter().map(|c| c.name.clone()).collect()
    }

    /// Match across all caches, oldest first.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.caches.iter().find_map(|c| c.match_request(key))
    }
}

// ==================== Storage Trait ====================

/// Async access to persistent cache storage.
///
/// Individual operations are atomic; callers never observe a half-applied
/// `put` or `delete`.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if absent.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Cache names, oldest first.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Store an entry in an open cache.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Look up a request in one cache.
    async fn match_in(&self, name: &str, key: &CacheKey)
        -> Result<Option<CacheEntry>, CacheError>;

    /// Look up a request across all caches.
    async fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Every entry in one cache.
    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError>;
}
