//! Mapping from container metadata to the facts published in the registry

use crate::container::ContainerMetadata;
use crate::error::ValidationError;
use crate::keys::RegistryKeySet;

pub const LABEL_SERVICE_NAME: &str = "discovery.service.name";
pub const LABEL_SERVICE_INSTANCE: &str = "discovery.service.instance";
pub const LABEL_SERVICE_NETWORK: &str = "discovery.service.network";
pub const LABEL_SERVICE_PORTS_GRPC: &str = "discovery.service.ports.grpc";
pub const LABEL_SERVICE_HOST_EXTERNAL: &str = "discovery.service.host.external";

/// Service name and instance name; together the prefix of every key
/// published for a container.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub service: String,
    pub instance: String,
}

impl ServiceIdentity {
    pub fn new(service: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            instance: instance.into(),
        }
    }

    /// Identity declared by the container labels, or `None` if the container
    /// is not discovery-enabled.
    pub fn from_metadata(metadata: &ContainerMetadata) -> Option<Self> {
        let service = non_empty(metadata.label(LABEL_SERVICE_NAME))?;
        let instance = non_empty(metadata.label(LABEL_SERVICE_INSTANCE))?;
        Some(Self::new(service, instance))
    }

    pub fn keys(&self) -> RegistryKeySet {
        RegistryKeySet::for_identity(self)
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.instance)
    }
}

/// Facts published for one running container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub identity: ServiceIdentity,
    pub host: String,
    pub external_host: Option<String>,
    pub grpc_port: Option<String>,
    pub external_grpc_ports: Vec<String>,
}

impl ServiceRegistration {
    /// Key/value pairs for every populated field, in canonical key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        let keys = self.identity.keys();
        let mut entries = vec![(keys.host, self.host.clone())];

        if let Some(external_host) = &self.external_host {
            entries.push((keys.external_host, external_host.clone()));
        }
        if let Some(grpc_port) = &self.grpc_port {
            entries.push((keys.grpc_port, grpc_port.clone()));
        }
        if !self.external_grpc_ports.is_empty() {
            entries.push((keys.external_grpc_port, self.external_grpc_ports.join(",")));
        }

        entries
    }
}

/// Derive the registration for a container.
///
/// Returns `Ok(None)` when the container lacks either identity label, and a
/// validation error when it is discovery-enabled but its network cannot be
/// resolved to an address.
pub fn map_registration(
    metadata: &ContainerMetadata,
) -> Result<Option<ServiceRegistration>, ValidationError> {
    let Some(identity) = ServiceIdentity::from_metadata(metadata) else {
        return Ok(None);
    };

    let network = non_empty(metadata.label(LABEL_SERVICE_NETWORK))
        .ok_or(ValidationError::MissingNetworkLabel)?;
    let attachment = metadata
        .networks
        .get(network)
        .ok_or_else(|| ValidationError::NetworkNotAttached(network.to_string()))?;
    if attachment.ip_address.is_empty() {
        return Err(ValidationError::MissingAddress(network.to_string()));
    }

    let external_host = non_empty(metadata.label(LABEL_SERVICE_HOST_EXTERNAL)).map(str::to_string);

    let (grpc_port, external_grpc_ports) = match metadata.label(LABEL_SERVICE_PORTS_GRPC) {
        Some(declared) => grpc_ports(metadata, declared),
        None => (None, Vec::new()),
    };

    Ok(Some(ServiceRegistration {
        identity,
        host: attachment.ip_address.clone(),
        external_host,
        grpc_port,
        external_grpc_ports,
    }))
}

/// Scan published ports for the declared internal port, collecting every
/// non-empty host port bound to it in encounter order.
fn grpc_ports(metadata: &ContainerMetadata, declared: &str) -> (Option<String>, Vec<String>) {
    let mut matched = false;
    let mut host_ports = Vec::new();

    for published in metadata.ports.iter().filter(|p| p.port() == declared) {
        matched = true;
        host_ports.extend(
            published
                .bindings
                .iter()
                .filter(|b| !b.host_port.is_empty())
                .map(|b| b.host_port.clone()),
        );
    }

    (matched.then(|| declared.to_string()), host_ports)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
