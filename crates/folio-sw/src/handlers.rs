//! Install, activate, fetch and controller-change handlers.
//!
//! Handlers never fail because of seeding, cache writes or cache cleanup;
//! those are logged and recorded as effects. The only error a handler
//! surfaces to its caller is a fetch that neither the network nor any
//! cache could answer.

use std::fmt;
use std::sync::Arc;

use folio_net::{Fetcher, NetError, Request, Response, ResponseType};
use futures::future::join_all;
use http::StatusCode;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStorage};
use crate::clients::{ClientMessage, Clients};
use crate::config::WorkerConfig;
use crate::event::{Effect, EventOutcome, ResponseSource};
use crate::ServiceWorkerError;

/// Everything a handler may touch, built once per worker version.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<Clients>,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<Clients>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            clients,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether a network response may be written to the cache: a `200`
/// same-origin response that was not reached through a redirect.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK
        && response.response_type == ResponseType::Basic
        && !response.redirected
}

// ==================== Install ====================

/// Open the current cache and, when enabled, seed it.
pub async fn install(ctx: &WorkerContext) -> Result<EventOutcome, ServiceWorkerError> {
    let mut outcome = EventOutcome::default();

    if !ctx.config.seed_on_install {
        info!("Skipping caching, seeding is disabled for this environment");
        outcome.push(Effect::SeedingSkipped);
        outcome.push(Effect::SkipWaiting);
        return Ok(outcome);
    }

    let cache = ctx.cache_name();
    info!(cache, "Installing and caching assets");

    if let Err(e) = ctx.storage.open(cache).await {
        error!(cache, error = %e, "Caching failed during install");
        return Ok(outcome);
    }
    outcome.push(Effect::CacheOpened {
        cache: cache.to_string(),
    });

    let seeds = ctx.config.seed_urls.iter().map(|path| async move {
        let result = match ctx.config.resolve(path) {
            Ok(url) => seed_one(ctx, url.clone()).await.map(|()| url),
            Err(e) => Err(e),
        };
        (path, result)
    });

    let mut failed = 0usize;
    for (path, result) in join_all(seeds).await {
        match result {
            Ok(url) => outcome.push(Effect::Seeded { url }),
            Err(e) => {
                error!(url = %path, error = %e, "Failed to cache seed URL");
                failed += 1;
                outcome.push(Effect::SeedFailed {
                    url: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        cache,
        seeded = ctx.config.seed_urls.len() - failed,
        failed,
        "Caching completed"
    );
    outcome.push(Effect::SkipWaiting);
    Ok(outcome)
}

/// Fetch one seed URL and store it (`cache.add` semantics: any 2xx).
async fn seed_one(ctx: &WorkerContext, url: Url) -> Result<(), ServiceWorkerError> {
    let request = Request::get(url.clone());
    let response = ctx.fetcher.fetch(&request).await?;
    if !response.ok() {
        return Err(ServiceWorkerError::BadStatus {
            url,
            status: response.status_code(),
        });
    }
    let entry = CacheEntry::from_response(&request, &response);
    ctx.storage.put(ctx.cache_name(), entry).await?;
    trace!(url = %request.url, "Seeded");
    Ok(())
}

// ==================== Activate ====================

/// Delete every cache that is not the current generation, then claim
/// clients.
pub async fn activate(ctx: &WorkerContext) -> Result<EventOutcome, ServiceWorkerError> {
    let mut outcome = EventOutcome::default();
    let whitelist = ctx.config.whitelist();

    info!(cache = ctx.cache_name(), "Activating and cleaning up old caches");

    match ctx.storage.keys().await {
        Ok(names) => {
            for name in names.into_iter().filter(|n| !whitelist.contains(n)) {
                info!(cache = %name, "Deleting cache");
                match ctx.storage.delete(&name).await {
                    Ok(_) => outcome.push(Effect::CacheDeleted { cache: name }),
                    Err(e) => {
                        error!(cache = %name, error = %e, "Cache deletion failed");
                        outcome.push(Effect::CacheDeleteFailed {
                            cache: name,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Activation failed to enumerate caches");
            outcome.push(Effect::CacheEnumerationFailed {
                reason: e.to_string(),
            });
        }
    }

    let count = ctx.clients.claim().await;
    info!(claimed = count, "Activation and cleanup completed");
    outcome.push(Effect::ClientsClaimed { count });
    Ok(outcome)
}

// ==================== Fetch ====================

/// Network first, cache second, offline fallback last.
pub async fn fetch(
    ctx: &WorkerContext,
    request: Request,
) -> Result<EventOutcome, ServiceWorkerError> {
    if !request.is_get() {
        trace!(method = %request.method, url = %request.url, "Not intercepting");
        return Ok(EventOutcome::passthrough());
    }

    match ctx.fetcher.fetch(&request).await {
        Ok(response) => {
            let mut outcome = EventOutcome::default();
            if is_cacheable(&response) {
                store_response(ctx, &request, response.clone(), &mut outcome).await;
            } else {
                trace!(
                    url = %request.url,
                    status = response.status_code(),
                    response_type = response.response_type.as_str(),
                    "Response not cacheable"
                );
            }
            outcome.respond(response, ResponseSource::Network);
            Ok(outcome)
        }
        Err(err) => {
            debug!(url = %request.url, error = %err, "Network fetch failed, trying caches");
            from_cache(ctx, request, err).await
        }
    }
}

async fn store_response(
    ctx: &WorkerContext,
    request: &Request,
    copy: Response,
    outcome: &mut EventOutcome,
) {
    let key = CacheKey::for_request(request);
    let entry = CacheEntry::from_response(request, &copy);
    let cache = ctx.cache_name();

    let stored = match ctx.storage.open(cache).await {
        Ok(()) => ctx.storage.put(cache, entry).await,
        Err(e) => Err(e),
    };

    match stored {
        Ok(()) => {
            trace!(key = %key, "Cached network response");
            outcome.push(Effect::CachePut { key });
        }
        Err(e) => {
            error!(key = %key, error = %e, "Caching failed during fetch");
            outcome.push(Effect::CachePutFailed {
                key,
                reason: e.to_string(),
            });
        }
    }
}

async fn from_cache(
    ctx: &WorkerContext,
    request: Request,
    err: NetError,
) -> Result<EventOutcome, ServiceWorkerError> {
    let mut outcome = EventOutcome::default();

    let key = CacheKey::for_request(&request);
    if let Some(response) = lookup(ctx, &key).await {
        outcome.push(Effect::ServedFromCache { key });
        outcome.respond(response, ResponseSource::Cache);
        return Ok(outcome);
    }

    match ctx.config.fallback_url() {
        Ok(url) => {
            let fallback = CacheKey::get(&url);
            if let Some(response) = lookup(ctx, &fallback).await {
                info!(url = %request.url, "Serving fallback content for offline use");
                outcome.push(Effect::ServedFallback { key: fallback });
                outcome.respond(response, ResponseSource::Fallback);
                return Ok(outcome);
            }
        }
        Err(e) => {
            warn!(path = %ctx.config.offline_fallback, error = %e, "Unusable offline fallback path");
        }
    }

    error!(url = %request.url, "No fallback content available");
    Err(ServiceWorkerError::Offline {
        url: request.url,
        source: err,
    })
}

/// Cache lookup across all caches. Storage errors and unreadable entries
/// count as misses.
async fn lookup(ctx: &WorkerContext, key: &CacheKey) -> Option<Response> {
    match ctx.storage.match_any(key).await {
        Ok(Some(entry)) => match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key = %key, error = %e, "Cache lookup failed");
            None
        }
    }
}

// ==================== Controller Change ====================

/// Tell every controlled page that a new worker is in charge.
pub async fn controller_change(ctx: &WorkerContext) -> Result<EventOutcome, ServiceWorkerError> {
    info!(cache = ctx.cache_name(), "Controller changed, a new worker has taken control");
    let report = ctx.clients.broadcast(ClientMessage::NewSwAvailable).await;

    let mut outcome = EventOutcome::default();
    outcome.push(Effect::MessageBroadcast {
        delivered: report.delivered,
        dropped: report.dropped,
    });
    Ok(outcome)
}
