//! # Folio Offline Worker
//!
//! Offline cache worker for the Folio portfolio site.
//!
//! ## Features
//!
//! - **Versioned caches**: one current generation, older ones deleted on activate
//! - **Seeding**: production installs pre-cache the site's key routes
//! - **Network first**: successful same-origin GETs refresh the cache, failures
//!   fall back to the cache and then to the offline page
//! - **Controller change**: pages are told when a new worker takes over
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRuntime
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing ─┐
//!     │       ├── waiting    ─┼── ServiceWorker ── Arc<WorkerContext>
//!     │       └── active     ─┘
//!     ├── EventTable (EventKind → handler)
//!     └── Clients (shared by every version)
//!
//! WorkerContext
//!     ├── WorkerConfig
//!     ├── dyn CacheStorage (MemoryStorage | FileStorage)
//!     └── dyn Fetcher (folio_net::ResourceLoader)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod handlers;
pub mod lifecycle;
pub mod runtime;
pub mod storage;

pub use cache::{Cache, CacheEntry, CacheKey, CacheStorage, CacheStore};
pub use clients::{BroadcastReport, Client, ClientId, ClientMessage, ClientType, Clients};
pub use config::WorkerConfig;
pub use error::{CacheError, ServiceWorkerError};
pub use event::{Effect, EventKind, EventOutcome, EventTable, ResponseSource, WorkerEvent};
pub use handlers::WorkerContext;
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use runtime::{ActivationReport, RegisterReport, RuntimeEvent, ServiceWorkerRuntime};
pub use storage::{FileStorage, MemoryStorage};
