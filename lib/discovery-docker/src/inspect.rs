//! Decoding of `GET /containers/{id}/json`

use discovery_core::{ContainerMetadata, NetworkAttachment, PortBinding, PublishedPort};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectResponse {
    id: String,
    #[serde(default)]
    config: Option<InspectConfig>,
    #[serde(default)]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: Option<HashMap<String, InspectEndpoint>>,
    /// `"<port>/<proto>"` to bindings; `null` for exposed but unpublished ports
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<InspectPortBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct InspectEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct InspectPortBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

impl From<InspectResponse> for ContainerMetadata {
    fn from(response: InspectResponse) -> Self {
        let labels = response
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        let (networks, ports) = match response.network_settings {
            Some(settings) => (
                settings.networks.unwrap_or_default(),
                settings.ports.unwrap_or_default(),
            ),
            None => (HashMap::new(), BTreeMap::new()),
        };

        ContainerMetadata {
            id: response.id,
            labels,
            networks: networks
                .into_iter()
                .map(|(name, endpoint)| {
                    (
                        name,
                        NetworkAttachment {
                            ip_address: endpoint.ip_address,
                        },
                    )
                })
                .collect(),
            ports: ports
                .into_iter()
                .map(|(container_port, bindings)| PublishedPort {
                    container_port,
                    bindings: bindings
                        .unwrap_or_default()
                        .into_iter()
                        .map(|b| PortBinding {
                            host_ip: b.host_ip,
                            host_port: b.host_port,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::{map_registration, ServiceIdentity};

    const RUNNING: &str = r#"{
        "Id": "4a2f",
        "Name": "/api-a1",
        "State": {"Status": "running", "Running": true},
        "Config": {
            "Image": "registry/api:1.2",
            "Labels": {
                "discovery.service.name": "api",
                "discovery.service.instance": "a1",
                "discovery.service.network": "backend",
                "discovery.service.ports.grpc": "9090",
                "discovery.service.host.external": "api.example.com"
            }
        },
        "NetworkSettings": {
            "Ports": {
                "8080/tcp": null,
                "9090/tcp": [
                    {"HostIp": "0.0.0.0", "HostPort": "8001"},
                    {"HostIp": "::", "HostPort": "8002"}
                ]
            },
            "Networks": {
                "backend": {"IPAddress": "172.18.0.4", "Gateway": "172.18.0.1"}
            }
        }
    }"#;

    const STOPPED: &str = r#"{
        "Id": "9bc1",
        "Config": {"Labels": {"discovery.service.name": "api", "discovery.service.instance": "a2"}},
        "NetworkSettings": {"Ports": {}, "Networks": null}
    }"#;

    #[test]
    fn test_decode_running_container() {
        let response: InspectResponse = serde_json::from_str(RUNNING).unwrap();
        let metadata = ContainerMetadata::from(response);

        assert_eq!(metadata.id, "4a2f");
        assert_eq!(metadata.label("discovery.service.name"), Some("api"));
        assert_eq!(metadata.networks["backend"].ip_address, "172.18.0.4");
        assert_eq!(metadata.ports.len(), 2);
        assert_eq!(metadata.ports[0].container_port, "8080/tcp");
        assert!(metadata.ports[0].bindings.is_empty());
        assert_eq!(metadata.ports[1].bindings[1].host_port, "8002");

        let registration = map_registration(&metadata).unwrap().unwrap();
        assert_eq!(registration.host, "172.18.0.4");
        assert_eq!(registration.grpc_port.as_deref(), Some("9090"));
        assert_eq!(registration.external_grpc_ports, vec!["8001", "8002"]);
    }

    #[test]
    fn test_decode_stopped_container() {
        let response: InspectResponse = serde_json::from_str(STOPPED).unwrap();
        let metadata = ContainerMetadata::from(response);

        assert!(metadata.networks.is_empty());
        assert!(metadata.ports.is_empty());
        assert_eq!(
            ServiceIdentity::from_metadata(&metadata),
            Some(ServiceIdentity::new("api", "a2"))
        );
    }

    #[test]
    fn test_decode_null_labels() {
        let response: InspectResponse =
            serde_json::from_str(r#"{"Id": "c0", "Config": {"Labels": null}}"#).unwrap();
        let metadata = ContainerMetadata::from(response);
        assert!(metadata.labels.is_empty());
    }
}
