//! Container runtime abstraction consumed by the engine

use crate::container::{ContainerMetadata, LifecycleEvent};
use crate::error::RuntimeError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Live event feed returned by [`ContainerRuntime::subscribe`].
///
/// Both channels stay open until the governing token is cancelled.
pub struct EventSubscription {
    pub events: mpsc::Receiver<LifecycleEvent>,
    pub errors: mpsc::Receiver<RuntimeError>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start streaming lifecycle events. The returned channels are fed by a
    /// background task that stops when `cancel` fires.
    fn subscribe(&self, cancel: CancellationToken) -> EventSubscription;

    /// Point-in-time metadata for a container, including stopped ones.
    async fn inspect(&self, container_id: &str) -> Result<ContainerMetadata, RuntimeError>;
}
