//! Docker as a container runtime for the synchronization engine

use crate::client::DockerClient;
use crate::events::stream_events;
use crate::inspect::InspectResponse;
use async_trait::async_trait;
use discovery_core::{ContainerMetadata, ContainerRuntime, EventSubscription, RuntimeError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 256;
const ERROR_BUFFER: usize = 16;

pub struct DockerRuntime {
    client: DockerClient,
    /// Current bound for each inspection
    timeout: watch::Receiver<Duration>,
}

impl DockerRuntime {
    pub fn new(client: DockerClient, timeout: watch::Receiver<Duration>) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn subscribe(&self, cancel: CancellationToken) -> EventSubscription {
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (error_tx, errors) = mpsc::channel(ERROR_BUFFER);

        tokio::spawn(stream_events(
            self.client.clone(),
            event_tx,
            error_tx,
            cancel,
        ));

        EventSubscription { events, errors }
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerMetadata, RuntimeError> {
        let timeout = *self.timeout.borrow();
        let path = self
            .client
            .path(&format!("/containers/{}/json", container_id));

        match time::timeout(timeout, self.client.get_json::<InspectResponse>(&path)).await {
            Ok(Ok(response)) => Ok(ContainerMetadata::from(response)),
            Ok(Err(RuntimeError::Api { status: 404, .. })) => {
                Err(RuntimeError::NotFound(container_id.to_string()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RuntimeError::Timeout(timeout)),
        }
    }
}
