//! Event-driven synchronization between container lifecycle and the registry

use crate::container::{ContainerMetadata, EventAction, LifecycleEvent};
use crate::error::CoreError;
use crate::registration::{map_registration, ServiceIdentity};
use crate::registry::KeyValueRegistry;
use crate::runtime::{ContainerRuntime, EventSubscription};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the engine needs, built once by the caller.
pub struct EngineDeps<R, K> {
    pub runtime: R,
    pub registry: K,
    /// Current timeout for each registry put/delete; read on every call
    pub op_timeout: watch::Receiver<Duration>,
}

/// Result of handling a single lifecycle event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Status is not one the engine reacts to
    Ignored,
    /// Container lacks the identity labels
    NotDiscoverable,
    /// Inspection or validation failed; nothing was written
    Dropped,
    Published {
        identity: ServiceIdentity,
        written: usize,
        failed: usize,
    },
    Withdrawn {
        identity: ServiceIdentity,
        deleted: usize,
        failed: usize,
    },
}

/// SyncEngine consumes runtime events and keeps the registry in step with
/// running containers. It holds no state between events.
pub struct SyncEngine<R, K> {
    runtime: R,
    registry: K,
    op_timeout: watch::Receiver<Duration>,
}

/// Handle to a running engine task
pub struct EngineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Request shutdown. The loop exits at its next wait point; keys already
    /// written stay in the registry.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the engine task to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Engine task failed: {}", e);
        }
    }
}

impl<R, K> SyncEngine<R, K>
where
    R: ContainerRuntime + 'static,
    K: KeyValueRegistry + 'static,
{
    pub fn new(deps: EngineDeps<R, K>) -> Self {
        Self {
            runtime: deps.runtime,
            registry: deps.registry,
            op_timeout: deps.op_timeout,
        }
    }

    /// Spawn the consumption loop on its own task
    pub fn start(self, cancel: CancellationToken) -> EngineHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        EngineHandle { cancel, task }
    }

    /// Consume events until `cancel` fires or the event stream closes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Service discovery started");

        let EventSubscription {
            mut events,
            mut errors,
        } = self.runtime.subscribe(cancel.clone());
        let mut errors_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event).await;
                    }
                    None => {
                        warn!("Runtime event stream closed");
                        break;
                    }
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) => error!("Event error: {}", err),
                    None => errors_open = false,
                },
            }
        }

        info!("Service discovery stopped");
    }

    pub async fn handle_event(&self, event: &LifecycleEvent) -> EventOutcome {
        match event.action() {
            EventAction::Activate => self.activate(&event.container_id).await,
            EventAction::Deactivate => self.deactivate(&event.container_id).await,
            EventAction::Ignore => EventOutcome::Ignored,
        }
    }

    async fn activate(&self, container_id: &str) -> EventOutcome {
        let Some(metadata) = self.inspect(container_id).await else {
            return EventOutcome::Dropped;
        };

        let registration = match map_registration(&metadata) {
            Ok(Some(registration)) => registration,
            Ok(None) => {
                debug!(container_id, "Container is not discovery-enabled");
                return EventOutcome::NotDiscoverable;
            }
            Err(source) => {
                let err = CoreError::Validation {
                    container_id: container_id.to_string(),
                    source,
                };
                error!(container_id, "{}", err);
                return EventOutcome::Dropped;
            }
        };

        let identity = registration.identity.clone();
        info!(
            container_id,
            instance = %identity.instance,
            "{} started",
            identity.service
        );

        let mut written = 0;
        let mut failed = 0;
        for (key, value) in registration.entries() {
            match self.registry.put(&key, &value, self.op_timeout()).await {
                Ok(()) => {
                    debug!(container_id, key = %key, value = %value, "Published key");
                    written += 1;
                }
                Err(source) => {
                    let err = CoreError::RegistryWrite { key, source };
                    error!(container_id, "{}", err);
                    failed += 1;
                }
            }
        }

        EventOutcome::Published {
            identity,
            written,
            failed,
        }
    }

    async fn deactivate(&self, container_id: &str) -> EventOutcome {
        let Some(metadata) = self.inspect(container_id).await else {
            return EventOutcome::Dropped;
        };

        let Some(identity) = ServiceIdentity::from_metadata(&metadata) else {
            debug!(container_id, "Container is not discovery-enabled");
            return EventOutcome::NotDiscoverable;
        };

        info!(
            container_id,
            instance = %identity.instance,
            "{} stopped",
            identity.service
        );

        let keys = identity.keys();
        let mut deleted = 0;
        let mut failed = 0;
        for key in keys.all() {
            match self.registry.delete(key, self.op_timeout()).await {
                Ok(()) => deleted += 1,
                Err(source) => {
                    let err = CoreError::RegistryWrite {
                        key: key.to_string(),
                        source,
                    };
                    error!(container_id, "{}", err);
                    failed += 1;
                }
            }
        }

        EventOutcome::Withdrawn {
            identity,
            deleted,
            failed,
        }
    }

    async fn inspect(&self, container_id: &str) -> Option<ContainerMetadata> {
        match self.runtime.inspect(container_id).await {
            Ok(metadata) => Some(metadata),
            Err(source) => {
                let err = CoreError::Inspection {
                    container_id: container_id.to_string(),
                    source,
                };
                error!(container_id, "{}", err);
                None
            }
        }
    }

    fn op_timeout(&self) -> Duration {
        *self.op_timeout.borrow()
    }
}
