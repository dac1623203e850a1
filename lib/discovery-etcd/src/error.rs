use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("etcd server address is not specified")]
    MissingEndpoints,

    #[error("Failed to connect to etcd: {0}")]
    Connect(#[source] etcd_client::Error),

    #[error("Failed to read configuration key {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: etcd_client::Error,
    },

    #[error("Timed out after {timeout:?} reading configuration key {key}")]
    Timeout { key: String, timeout: Duration },

    #[error("Required configuration parameter is not specified - {key}")]
    Required { key: String },

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
