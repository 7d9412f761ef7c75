//! Worker events, their outcomes and the dispatch table.
//!
//! Each handler takes an event and the worker context and returns the
//! response (if any) plus the ordered list of side effects it performed.
//! Tests assert on the effect list instead of inspecting a live runtime.

use std::fmt;

use folio_net::{Request, Response};
use futures::future::BoxFuture;
use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::cache::CacheKey;
use crate::handlers::{self, WorkerContext};
use crate::ServiceWorkerError;

/// An event delivered to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    ControllerChange,
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::ControllerChange => EventKind::ControllerChange,
        }
    }
}

/// Discriminant used to key the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    ControllerChange,
}

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Exact match in a cache.
    Cache,
    /// The offline fallback page.
    Fallback,
}

/// A side effect performed while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CacheOpened { cache: String },
    SeedingSkipped,
    Seeded { url: Url },
    SeedFailed { url: String, reason: String },
    SkipWaiting,
    CacheDeleted { cache: String },
    CacheDeleteFailed { cache: String, reason: String },
    CacheEnumerationFailed { reason: String },
    ClientsClaimed { count: usize },
    Passthrough,
    CachePut { key: CacheKey },
    CachePutFailed { key: CacheKey, reason: String },
    ServedFromCache { key: CacheKey },
    ServedFallback { key: CacheKey },
    MessageBroadcast { delivered: usize, dropped: usize },
}

/// Result of handling one event.
#[derive(Debug, Clone, Default)]
pub struct EventOutcome {
    pub response: Option<Response>,
    pub source: Option<ResponseSource>,
    pub effects: Vec<Effect>,
}

impl EventOutcome {
    /// Outcome of an event the worker declined to intercept.
    pub fn passthrough() -> Self {
        Self {
            effects: vec![Effect::Passthrough],
            ..Default::default()
        }
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn respond(&mut self, response: Response, source: ResponseSource) {
        self.response = Some(response);
        self.source = Some(source);
    }

    pub fn is_passthrough(&self) -> bool {
        self.effects.contains(&Effect::Passthrough)
    }

    /// Whether the handler asked to activate without waiting.
    pub fn requested_skip_waiting(&self) -> bool {
        self.effects.contains(&Effect::SkipWaiting)
    }

    /// Keys written to a cache by this event.
    pub fn cache_writes(&self) -> Vec<&CacheKey> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                Effect::CachePut { key } => Some(key),
                _ => None,
            })
            .collect()
    }
}

/// Handler entry in the dispatch table.
pub type Handler = for<'a> fn(
    WorkerEvent,
    &'a WorkerContext,
) -> BoxFuture<'a, Result<EventOutcome, ServiceWorkerError>>;

/// Dispatch table keyed by event kind.
#[derive(Clone, Default)]
pub struct EventTable {
    handlers: HashMap<EventKind, Handler>,
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTable")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventTable {
    /// An empty table; every dispatch fails with `NoHandler`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install, activate, fetch and controller-change handlers.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(EventKind::Install, on_install);
        table.register(EventKind::Activate, on_activate);
        table.register(EventKind::Fetch, on_fetch);
        table.register(EventKind::ControllerChange, on_controller_change);
        table
    }

    /// Register or replace the handler for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route `event` to its handler.
    pub async fn dispatch(
        &self,
        event: WorkerEvent,
        context: &WorkerContext,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        let kind = event.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(ServiceWorkerError::NoHandler(kind))?;
        debug!(event = ?kind, "Dispatching worker event");
        handler(event, context).await
    }
}

fn on_install(
    _event: WorkerEvent,
    context: &WorkerContext,
) -> BoxFuture<'_, Result<EventOutcome, ServiceWorkerError>> {
    Box::pin(handlers::install(context))
}

fn on_activate(
    _event: WorkerEvent,
    context: &WorkerContext,
) -> BoxFuture<'_, Result<EventOutcome, ServiceWorkerError>> {
    Box::pin(handlers::activate(context))
}

fn on_fetch(
    event: WorkerEvent,
    context: &WorkerContext,
) -> BoxFuture<'_, Result<EventOutcome, ServiceWorkerError>> {
    Box::pin(async move {
        match event {
            WorkerEvent::Fetch(request) => handlers::fetch(context, request).await,
            other => Err(ServiceWorkerError::StateError(format!(
                "fetch handler got {:?}",
                other.kind()
            ))),
        }
    })
}

fn on_controller_change(
    _event: WorkerEvent,
    context: &WorkerContext,
) -> BoxFuture<'_, Result<EventOutcome, ServiceWorkerError>> {
    Box::pin(handlers::controller_change(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_for;
    use futures::FutureExt;

    fn refuse(
        _event: WorkerEvent,
        _context: &WorkerContext,
    ) -> BoxFuture<'_, Result<EventOutcome, ServiceWorkerError>> {
        async { Ok(EventOutcome::passthrough()) }.boxed()
    }

    #[test]
    fn test_event_kinds() {
        let url = Url::parse("https://patrickprunty.com/").unwrap();
        assert_eq!(WorkerEvent::Install.kind(), EventKind::Install);
        assert_eq!(WorkerEvent::Fetch(Request::get(url)).kind(), EventKind::Fetch);
    }

    #[test]
    fn test_standard_table_is_complete() {
        let table = EventTable::standard();
        for kind in [
            EventKind::Install,
            EventKind::Activate,
            EventKind::Fetch,
            EventKind::ControllerChange,
        ] {
            assert!(table.handles(kind), "{kind:?} missing");
        }
    }

    #[tokio::test]
    async fn test_empty_table_has_no_handler() {
        let context = context_for("v9");
        let result = EventTable::new().dispatch(WorkerEvent::Activate, &context).await;
        assert!(matches!(
            result,
            Err(ServiceWorkerError::NoHandler(EventKind::Activate))
        ));
    }

    #[tokio::test]
    async fn test_register_replaces_handler() {
        let context = context_for("v9");
        let mut table = EventTable::standard();
        table.register(EventKind::Install, refuse);

        let outcome = table.dispatch(WorkerEvent::Install, &context).await.unwrap();
        assert!(outcome.is_passthrough());
    }

    #[test]
    fn test_outcome_helpers() {
        let key = CacheKey::get(&Url::parse("https://patrickprunty.com/").unwrap());
        let mut outcome = EventOutcome::default();
        outcome.push(Effect::CachePut { key: key.clone() });
        outcome.push(Effect::SkipWaiting);

        assert_eq!(outcome.cache_writes(), vec![&key]);
        assert!(outcome.requested_skip_waiting());
        assert!(!outcome.is_passthrough());
    }
}
