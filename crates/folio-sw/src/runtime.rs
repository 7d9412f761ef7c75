//! Drives worker versions through their lifecycle.

use std::sync::Arc;

use folio_net::Request;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientId, ClientMessage, ClientType, Clients};
use crate::event::{EventOutcome, EventTable, WorkerEvent};
use crate::handlers::WorkerContext;
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Lifecycle notifications published by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        state: ServiceWorkerState,
    },
    /// A newly activated worker replaced the previous controller.
    ControllerChange {
        worker_id: ServiceWorkerId,
        version: String,
    },
}

/// What happened to a registered version.
#[derive(Debug)]
pub struct RegisterReport {
    pub worker_id: ServiceWorkerId,
    pub install: EventOutcome,
    /// `None` while the worker is still waiting.
    pub activation: Option<ActivationReport>,
}

/// Outcome of promoting a waiting worker.
#[derive(Debug)]
pub struct ActivationReport {
    pub worker_id: ServiceWorkerId,
    pub activate: EventOutcome,
    /// Present when a previous worker was superseded.
    pub controller_change: Option<EventOutcome>,
}

/// Owns the registration, the shared client set and the dispatch table.
///
/// Lifecycle jobs (register, activate, the activation triggered by the last
/// page leaving, unregister) run one at a time.
pub struct ServiceWorkerRuntime {
    registration: RwLock<ServiceWorkerRegistration>,
    jobs: Mutex<()>,
    clients: Arc<Clients>,
    table: EventTable,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ServiceWorkerRuntime {
    /// Create a runtime for `scope` with the standard handlers.
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        Self::with_table(scope, EventTable::standard())
    }

    pub fn with_table(
        scope: Url,
        table: EventTable,
    ) -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(ServiceWorkerRegistration::new(scope)),
                jobs: Mutex::new(()),
                clients: Arc::new(Clients::new()),
                table,
                event_tx,
            },
            event_rx,
        )
    }

    /// Clients shared by every worker version; pass this into each
    /// [`WorkerContext`].
    pub fn clients(&self) -> Arc<Clients> {
        Arc::clone(&self.clients)
    }

    fn emit(&self, event: RuntimeEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, version: &str, state: ServiceWorkerState) {
        self.emit(RuntimeEvent::StateChange {
            worker_id,
            version: version.to_string(),
            state,
        });
    }

    /// Install a new worker version and activate it when it asks to skip
    /// waiting or nothing is active yet.
    pub async fn register(
        &self,
        context: WorkerContext,
    ) -> Result<RegisterReport, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        let context = Arc::new(context);
        let version = context.config.cache_name.clone();

        let (worker_id, stale) = self
            .registration
            .write()
            .await
            .begin_install(Arc::clone(&context))?;
        if let Some(old) = stale {
            self.emit_state(old.id, &old.version, ServiceWorkerState::Redundant);
        }
        info!(worker = worker_id.raw(), version = %version, "Installing worker");
        self.emit_state(worker_id, &version, ServiceWorkerState::Installing);

        let install = match self.table.dispatch(WorkerEvent::Install, &context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(worker = worker_id.raw(), error = %e, "Install failed");
                self.registration.write().await.install_failed(worker_id);
                self.emit_state(worker_id, &version, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        let (replaced, has_active) = {
            let mut registration = self.registration.write().await;
            let replaced = registration.install_complete(worker_id)?;
            (replaced, registration.active.is_some())
        };
        if let Some(old) = replaced {
            self.emit_state(old.id, &old.version, ServiceWorkerState::Redundant);
        }
        self.emit_state(worker_id, &version, ServiceWorkerState::Installed);

        let activation = if install.requested_skip_waiting()
            || !has_active
            || self.clients.is_empty().await
        {
            Some(self.promote().await?)
        } else {
            debug!(worker = worker_id.raw(), "Waiting for clients to close");
            None
        };

        Ok(RegisterReport {
            worker_id,
            install,
            activation,
        })
    }

    /// Promote the waiting worker, run its activate handler and, if it
    /// replaced a previous worker, its controller-change handler.
    pub async fn activate_waiting(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        self.promote().await
    }

    async fn promote(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let (context, worker_id, superseded) = {
            let mut registration = self.registration.write().await;
            let superseded = registration.begin_activation()?;
            let active = registration
                .get_active()
                .ok_or_else(|| ServiceWorkerError::StateError("no active worker".into()))?;
            (Arc::clone(active.context()), active.id, superseded)
        };
        let version = context.config.cache_name.clone();

        if let Some(ref old) = superseded {
            self.emit_state(old.id, &old.version, ServiceWorkerState::Redundant);
        }
        self.emit_state(worker_id, &version, ServiceWorkerState::Activating);

        let activate = self.table.dispatch(WorkerEvent::Activate, &context).await?;

        self.registration.write().await.finish_activation()?;
        info!(worker = worker_id.raw(), version = %version, "Worker activated");
        self.emit_state(worker_id, &version, ServiceWorkerState::Activated);

        let controller_change = match superseded {
            Some(_) => {
                self.emit(RuntimeEvent::ControllerChange {
                    worker_id,
                    version: version.clone(),
                });
                Some(
                    self.table
                        .dispatch(WorkerEvent::ControllerChange, &context)
                        .await?,
                )
            }
            None => None,
        };

        Ok(ActivationReport {
            worker_id,
            activate,
            controller_change,
        })
    }

    /// Route a request through the active worker. Without an active worker
    /// the request is not intercepted.
    pub async fn fetch(&self, request: Request) -> Result<EventOutcome, ServiceWorkerError> {
        let context = self
            .registration
            .read()
            .await
            .get_active()
            .map(|w| Arc::clone(w.context()));

        match context {
            Some(context) => self.table.dispatch(WorkerEvent::Fetch(request), &context).await,
            None => Ok(EventOutcome::passthrough()),
        }
    }

    /// Connect a page.
    pub async fn connect(
        &self,
        url: Url,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        self.clients.connect(url, ClientType::Window).await
    }

    /// Disconnect a page. When the last page goes away a waiting worker is
    /// activated.
    pub async fn disconnect(
        &self,
        id: ClientId,
    ) -> Result<Option<ActivationReport>, ServiceWorkerError> {
        self.clients.disconnect(id).await;
        let _job = self.jobs.lock().await;
        let waiting = self.registration.read().await.waiting.is_some();
        if waiting && self.clients.is_empty().await {
            return self.promote().await.map(Some);
        }
        Ok(None)
    }

    /// Version of the active worker.
    pub async fn active_version(&self) -> Option<String> {
        self.registration
            .read()
            .await
            .get_active()
            .map(|w| w.version.clone())
    }

    /// Version of the waiting worker.
    pub async fn waiting_version(&self) -> Option<String> {
        self.registration
            .read()
            .await
            .waiting
            .as_ref()
            .map(|w| w.version.clone())
    }

    /// Drop every worker version.
    pub async fn unregister(&self) -> usize {
        let _job = self.jobs.lock().await;
        let gone = self.registration.write().await.unregister();
        for worker in &gone {
            self.emit_state(worker.id, &worker.version, ServiceWorkerState::Redundant);
        }
        gone.len()
    }
}
