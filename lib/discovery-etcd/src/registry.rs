//! etcd-backed key-value registry

use async_trait::async_trait;
use discovery_core::{KeyValueRegistry, RegistryError};
use etcd_client::Client;
use std::time::Duration;
use tokio::time;

/// EtcdRegistry writes registry keys as plain string values.
pub struct EtcdRegistry {
    client: Client,
}

impl EtcdRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyValueRegistry for EtcdRegistry {
    async fn put(&self, key: &str, value: &str, timeout: Duration) -> Result<(), RegistryError> {
        let mut client = self.client.clone();
        match time::timeout(timeout, client.put(key, value, None)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RegistryError::Backend(e.to_string())),
            Err(_) => Err(RegistryError::Timeout(timeout)),
        }
    }

    async fn delete(&self, key: &str, timeout: Duration) -> Result<(), RegistryError> {
        let mut client = self.client.clone();
        match time::timeout(timeout, client.delete(key, None)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RegistryError::Backend(e.to_string())),
            Err(_) => Err(RegistryError::Timeout(timeout)),
        }
    }
}
