//! etcd connection setup

use crate::error::ConfigError;
use etcd_client::{Client, ConnectOptions};
use std::fmt;
use std::time::Duration;
use tracing::info;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Username and password for etcd authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings read from the process environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdSettings {
    pub endpoints: Vec<String>,
    pub credentials: Option<Credentials>,
}

impl EtcdSettings {
    /// Read `ETCD_ADDR`, `ETCD_USERNAME` and `ETCD_PASSWORD`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoints: Vec<String> = lookup("ETCD_ADDR")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        if endpoints.is_empty() {
            return Err(ConfigError::MissingEndpoints);
        }

        let username = lookup("ETCD_USERNAME").unwrap_or_default();
        let password = lookup("ETCD_PASSWORD").unwrap_or_default();
        let credentials = (!username.is_empty() && !password.is_empty())
            .then_some(Credentials { username, password });

        Ok(Self {
            endpoints,
            credentials,
        })
    }
}

/// EtcdConnection wraps the etcd client shared by the registry and the
/// settings loader
pub struct EtcdConnection {
    client: Client,
}

impl EtcdConnection {
    pub async fn connect(settings: &EtcdSettings) -> Result<Self, ConfigError> {
        let mut options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        if let Some(credentials) = &settings.credentials {
            options = options.with_user(
                credentials.username.clone(),
                credentials.password.clone(),
            );
        }

        let client = Client::connect(&settings.endpoints, Some(options))
            .await
            .map_err(ConfigError::Connect)?;

        info!(endpoints = ?settings.endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    /// Get a clone of the etcd client
    pub fn clone_client(&self) -> Client {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_missing_address() {
        assert!(matches!(
            EtcdSettings::from_lookup(lookup(&[])),
            Err(ConfigError::MissingEndpoints)
        ));
        assert!(matches!(
            EtcdSettings::from_lookup(lookup(&[("ETCD_ADDR", " , ")])),
            Err(ConfigError::MissingEndpoints)
        ));
    }

    #[test]
    fn test_endpoints_split() {
        let settings = EtcdSettings::from_lookup(lookup(&[(
            "ETCD_ADDR",
            "http://etcd-0:2379, http://etcd-1:2379",
        )]))
        .unwrap();
        assert_eq!(
            settings.endpoints,
            vec!["http://etcd-0:2379", "http://etcd-1:2379"]
        );
        assert_eq!(settings.credentials, None);
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let settings = EtcdSettings::from_lookup(lookup(&[
            ("ETCD_ADDR", "http://etcd:2379"),
            ("ETCD_USERNAME", "root"),
        ]))
        .unwrap();
        assert_eq!(settings.credentials, None);

        let settings = EtcdSettings::from_lookup(lookup(&[
            ("ETCD_ADDR", "http://etcd:2379"),
            ("ETCD_USERNAME", "root"),
            ("ETCD_PASSWORD", "s3cret"),
        ]))
        .unwrap();
        let credentials = settings.credentials.unwrap();
        assert_eq!(credentials.username, "root");
        assert!(!format!("{:?}", credentials).contains("s3cret"));
    }
}
