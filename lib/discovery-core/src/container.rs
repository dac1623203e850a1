//! Container metadata and lifecycle events as seen by the engine

use std::collections::HashMap;

/// Point-in-time view of a container, as returned by a runtime inspection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub id: String,
    pub labels: HashMap<String, String>,
    /// Network attachments keyed by network name
    pub networks: HashMap<String, NetworkAttachment>,
    /// Published ports in the order the runtime reported them
    pub ports: Vec<PublishedPort>,
}

impl ContainerMetadata {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub ip_address: String,
}

/// A container-internal port and the host bindings mapped onto it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishedPort {
    /// Internal port in `<port>/<proto>` form, e.g. `8080/tcp`
    pub container_port: String,
    pub bindings: Vec<PortBinding>,
}

impl PublishedPort {
    /// Port number without the protocol suffix
    pub fn port(&self) -> &str {
        self.container_port
            .split_once('/')
            .map(|(port, _)| port)
            .unwrap_or(&self.container_port)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// What the engine does in response to a lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAction {
    Activate,
    Deactivate,
    Ignore,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub container_id: String,
    pub status: String,
}

impl LifecycleEvent {
    pub fn new(container_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            status: status.into(),
        }
    }

    pub fn action(&self) -> EventAction {
        match self.status.as_str() {
            "start" | "unpause" => EventAction::Activate,
            "die" | "pause" => EventAction::Deactivate,
            _ => EventAction::Ignore,
        }
    }
}
