//! Canonical registry keys owned by a service identity

use crate::registration::ServiceIdentity;

/// The four keys published for one service instance.
///
/// ```text
/// /services/{service}/{instance}/host
/// /services/{service}/{instance}/host/external
/// /services/{service}/{instance}/ports/grpc
/// /services/{service}/{instance}/ports/grpc/external
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryKeySet {
    pub host: String,
    pub external_host: String,
    pub grpc_port: String,
    pub external_grpc_port: String,
}

impl RegistryKeySet {
    pub fn for_identity(identity: &ServiceIdentity) -> Self {
        let prefix = format!("/services/{}/{}", identity.service, identity.instance);
        Self {
            host: format!("{}/host", prefix),
            external_host: format!("{}/host/external", prefix),
            grpc_port: format!("{}/ports/grpc", prefix),
            external_grpc_port: format!("{}/ports/grpc/external", prefix),
        }
    }

    /// All keys, in canonical order
    pub fn all(&self) -> [&str; 4] {
        [
            self.host.as_str(),
            self.external_host.as_str(),
            self.grpc_port.as_str(),
            self.external_grpc_port.as_str(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_patterns() {
        let keys = RegistryKeySet::for_identity(&ServiceIdentity::new("api", "a1"));
        assert_eq!(keys.host, "/services/api/a1/host");
        assert_eq!(keys.external_host, "/services/api/a1/host/external");
        assert_eq!(keys.grpc_port, "/services/api/a1/ports/grpc");
        assert_eq!(keys.external_grpc_port, "/services/api/a1/ports/grpc/external");
    }

    #[test]
    fn test_all_is_ordered() {
        let keys = RegistryKeySet::for_identity(&ServiceIdentity::new("billing", "eu-1"));
        assert_eq!(
            keys.all(),
            [
                "/services/billing/eu-1/host",
                "/services/billing/eu-1/host/external",
                "/services/billing/eu-1/ports/grpc",
                "/services/billing/eu-1/ports/grpc/external",
            ]
        );
    }
}
