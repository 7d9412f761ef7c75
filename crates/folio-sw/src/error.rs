//! Error types for the offline worker.

use folio_net::NetError;
use thiserror::Error;
use url::Url;

use crate::event::EventKind;

/// Errors raised by a [`CacheStorage`](crate::CacheStorage) backend.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: Url, status: u16 },

    #[error("Offline and nothing cached for {url}")]
    Offline {
        url: Url,
        #[source]
        source: NetError,
    },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No handler registered for {0:?} events")]
    NoHandler(EventKind),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
