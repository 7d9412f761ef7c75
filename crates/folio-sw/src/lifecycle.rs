//! Worker lifecycle state machine.
//!
//! ```text
//! Parsed → Installing → Installed (waiting) → Activating → Activated
//!                │                                             │
//!                └──────────── Redundant ◄─────────────────────┘
//!                         (install failed / replaced)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::handlers::WorkerContext;
use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (_, Redundant)
        ) && self != Redundant
    }
}

/// One version of the worker.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache generation this version owns.
    pub version: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,

    context: Arc<WorkerContext>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(context: Arc<WorkerContext>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version: context.config.cache_name.clone(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            context,
        }
    }

    /// Set state, rejecting illegal transitions.
    pub fn set_state(&mut self, state: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        if !self.state.can_transition_to(state) {
            return Err(ServiceWorkerError::StateError(format!(
                "worker {} cannot go from {:?} to {:?}",
                self.id.raw(),
                self.state,
                state
            )));
        }
        self.state = state;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new version. A previous installing worker is
    /// made redundant and returned alongside the new id.
    pub fn begin_install(
        &mut self,
        context: Arc<WorkerContext>,
    ) -> Result<(ServiceWorkerId, Option<ServiceWorker>), ServiceWorkerError> {
        let stale = match self.installing.take() {
            Some(mut stale) => {
                stale.set_state(ServiceWorkerState::Redundant)?;
                Some(stale)
            }
            None => None,
        };
        let mut worker = ServiceWorker::new(context);
        worker.set_state(ServiceWorkerState::Installing)?;
        let id = worker.id;
        self.installing = Some(worker);
        Ok((id, stale))
    }

    /// Transition the installing worker `id` to waiting. A previous waiting
    /// worker is replaced and returned as redundant.
    pub fn install_complete(
        &mut self,
        id: ServiceWorkerId,
    ) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = match self.installing.take() {
            Some(worker) if worker.id == id => worker,
            other => {
                let current = other.as_ref().map(|w| w.id.raw());
                self.installing = other;
                return Err(ServiceWorkerError::StateError(format!(
                    "worker {} is not installing (installing: {:?})",
                    id.raw(),
                    current
                )));
            }
        };
        worker.set_state(ServiceWorkerState::Installed)?;

        let replaced = match self.waiting.replace(worker) {
            Some(mut old) => {
                old.set_state(ServiceWorkerState::Redundant)?;
                Some(old)
            }
            None => None,
        };
        Ok(replaced)
    }

    /// Discard the installing worker `id`. Another installing worker is
    /// left alone.
    pub fn install_failed(&mut self, id: ServiceWorkerId) -> Option<ServiceWorker> {
        if self.installing.as_ref().map(|w| w.id) != Some(id) {
            return None;
        }
        self.installing.take().map(|mut worker| {
            worker.state = ServiceWorkerState::Redundant;
            worker.state_changed_at = Instant::now();
            worker
        })
    }

    /// Promote the waiting worker to active in the `Activating` state.
    /// Returns the superseded active worker, now redundant.
    pub fn begin_activation(&mut self) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::StateError("nothing is waiting".into()))?;
        worker.set_state(ServiceWorkerState::Activating)?;

        let superseded = match self.active.replace(worker) {
            Some(mut old) => {
                old.set_state(ServiceWorkerState::Redundant)?;
                Some(old)
            }
            None => None,
        };
        Ok(superseded)
    }

    /// Mark the activating worker as activated.
    pub fn finish_activation(&mut self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let worker = self
            .active
            .as_mut()
            .ok_or_else(|| ServiceWorkerError::StateError("nothing is activating".into()))?;
        worker.set_state(ServiceWorkerState::Activated)?;
        Ok(worker.id)
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) -> Vec<ServiceWorker> {
        [
            self.installing.take(),
            self.waiting.take(),
            self.active.take(),
        ]
        .into_iter()
        .flatten()
        .map(|mut worker| {
            worker.state = ServiceWorkerState::Redundant;
            worker.state_changed_at = Instant::now();
            worker
        })
        .collect()
    }
}
