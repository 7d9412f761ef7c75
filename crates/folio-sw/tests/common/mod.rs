//! Shared fixtures for the offline worker tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use folio_net::{Fetcher, NetError, Request, Response, ResponseType};
use folio_sw::{
    CacheEntry, CacheError, CacheKey, CacheStorage, Clients, MemoryStorage, WorkerConfig,
    WorkerContext,
};
use hashbrown::HashMap;
use http::StatusCode;
use url::Url;

pub const ORIGIN: &str = "https://patrickprunty.com/";

pub fn site(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn page(path: &str, body: &str) -> Response {
    Response::new(site(path), StatusCode::OK).with_body(body.to_string())
}

/// Network double: answers from a table, records every request, and
/// fails anything it has no answer for.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<Url, Response>>,
    calls: Mutex<Vec<(String, Url)>>,
    offline: Mutex<bool>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(response.url.clone(), response);
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.respond(page(path, body));
    }

    pub fn serve_status(&self, path: &str, status: StatusCode) {
        self.respond(Response::new(site(path), status).with_body("error page"));
    }

    pub fn serve_type(&self, path: &str, response_type: ResponseType) {
        self.respond(page(path, "foreign").with_type(response_type));
    }

    pub fn go_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<(String, Url)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.method.to_string(), request.url.clone()));

        if *self.offline.lock().unwrap() {
            return Err(NetError::RequestFailed("network unreachable".into()));
        }
        self.responses
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| NetError::RequestFailed("connection refused".into()))
    }
}

/// Storage whose writes or enumeration can be made to fail.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    pub fail_puts: Mutex<bool>,
    pub fail_keys: Mutex<bool>,
    pub fail_delete: Mutex<Option<String>>,
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.fail_delete.lock().unwrap().as_deref() == Some(name) {
            return Err(CacheError::Io(std::io::Error::other("disk busy")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        if *self.fail_keys.lock().unwrap() {
            return Err(CacheError::Io(std::io::Error::other("quota exceeded")));
        }
        self.inner.keys().await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if *self.fail_puts.lock().unwrap() {
            return Err(CacheError::Io(std::io::Error::other("quota exceeded")));
        }
        self.inner.put(name, entry).await
    }

    async fn match_in(
        &self,
        name: &str,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.match_in(name, key).await
    }

    async fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.match_any(key).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>, CacheError> {
        self.inner.entries(name).await
    }
}

pub fn config(cache_name: &str, seed: bool) -> WorkerConfig {
    WorkerConfig {
        cache_name: cache_name.to_string(),
        origin: Url::parse(ORIGIN).unwrap(),
        seed_on_install: seed,
        ..Default::default()
    }
}

pub fn context(
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<ScriptedFetcher>,
) -> WorkerContext {
    WorkerContext::new(config, storage, fetcher, Arc::new(Clients::new()))
}

/// Put a page straight into a cache, bypassing the worker.
pub async fn preload(storage: &dyn CacheStorage, cache: &str, path: &str, body: &str) {
    storage.open(cache).await.unwrap();
    let request = Request::get(site(path));
    storage
        .put(cache, CacheEntry::from_response(&request, &page(path, body)))
        .await
        .unwrap();
}
