//! Key-value registry abstraction and an in-memory implementation

use crate::error::RegistryError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Write side of the distributed key-value store.
///
/// Every call is bounded by the caller-supplied timeout. Deleting a key that
/// does not exist succeeds.
#[async_trait]
pub trait KeyValueRegistry: Send + Sync {
    async fn put(&self, key: &str, value: &str, timeout: Duration) -> Result<(), RegistryError>;

    async fn delete(&self, key: &str, timeout: Duration) -> Result<(), RegistryError>;
}

/// A registry operation as recorded by [`MemoryRegistry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryOp {
    Put { key: String, value: String },
    Delete { key: String },
}

/// MemoryRegistry keeps keys in process memory.
///
/// Operations on keys marked with [`MemoryRegistry::fail_key`] return a backend
/// error without touching the stored value. Every attempted operation, failed
/// or not, is appended to the operation log. Clones share the same store.
#[derive(Clone)]
pub struct MemoryRegistry {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    ops: Arc<RwLock<Vec<RegistryOp>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            ops: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Make every subsequent operation on `key` fail
    pub async fn fail_key(&self, key: &str) {
        self.failing.write().await.insert(key.to_string());
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// All stored pairs whose key starts with `prefix`, ordered by key
    pub async fn list_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn operations(&self) -> Vec<RegistryOp> {
        self.ops.read().await.clone()
    }

    async fn check(&self, key: &str) -> Result<(), RegistryError> {
        if self.failing.read().await.contains(key) {
            return Err(RegistryError::Backend(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueRegistry for MemoryRegistry {
    async fn put(&self, key: &str, value: &str, _timeout: Duration) -> Result<(), RegistryError> {
        self.ops.write().await.push(RegistryOp::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        self.check(key).await?;

        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        debug!("Stored key: {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str, _timeout: Duration) -> Result<(), RegistryError> {
        self.ops.write().await.push(RegistryOp::Delete {
            key: key.to_string(),
        });
        self.check(key).await?;

        self.entries.write().await.remove(key);
        debug!("Removed key: {}", key);
        Ok(())
    }
}
