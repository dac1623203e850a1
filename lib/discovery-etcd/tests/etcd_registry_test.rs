//! etcd registry integration tests
//!
//! These tests need a running etcd server and are ignored by default. Run them
//! with `cargo test -p discovery-etcd --test etcd_registry_test -- --ignored`.
//!
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```

use discovery_core::KeyValueRegistry;
use discovery_etcd::{EtcdConnection, EtcdRegistry, EtcdSettings, SettingsSource};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoints from `ETCD_ADDR`, defaulting to a local server
fn settings() -> EtcdSettings {
    EtcdSettings::from_lookup(|name| match name {
        "ETCD_ADDR" => Some(
            std::env::var("ETCD_ADDR").unwrap_or_else(|_| "http://127.0.0.1:2379".to_string()),
        ),
        _ => std::env::var(name).ok(),
    })
    .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_put_then_delete() {
    let connection = EtcdConnection::connect(&settings()).await.unwrap();
    let registry = EtcdRegistry::new(connection.clone_client());
    let key = "/services/integration/it-1/host";

    registry.put(key, "10.0.0.5", TIMEOUT).await.unwrap();
    assert_eq!(
        connection.fetch(key).await.unwrap().value.as_deref(),
        Some("10.0.0.5")
    );

    registry.delete(key, TIMEOUT).await.unwrap();
    assert_eq!(connection.fetch(key).await.unwrap().value, None);
}

#[tokio::test]
#[ignore]
async fn test_delete_missing_key_succeeds() {
    let connection = EtcdConnection::connect(&settings()).await.unwrap();
    let registry = EtcdRegistry::new(connection.clone_client());

    registry
        .delete("/services/integration/never-written/host", TIMEOUT)
        .await
        .unwrap();
    registry
        .delete("/services/integration/never-written/host", TIMEOUT)
        .await
        .unwrap();
}
