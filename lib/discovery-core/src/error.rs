use std::time::Duration;
use thiserror::Error;

/// Failure of a container runtime query or of the runtime event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Runtime request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Runtime transport error: {0}")]
    Transport(String),

    #[error("Runtime API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed runtime response: {0}")]
    Decode(String),

    #[error("Unsupported runtime host: {0}")]
    UnsupportedHost(String),
}

/// Failure of a single registry put or delete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Registry backend error: {0}")]
    Backend(String),
}

/// Reasons a discovery-enabled container cannot be mapped to a registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No network defined")]
    MissingNetworkLabel,

    #[error("Network {0} not found")]
    NetworkNotAttached(String),

    #[error("Network {0} has no address assigned")]
    MissingAddress(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Inspect error for container {container_id}: {source}")]
    Inspection {
        container_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Invalid discovery labels on container {container_id}: {source}")]
    Validation {
        container_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Registry write failed for {key}: {source}")]
    RegistryWrite {
        key: String,
        #[source]
        source: RegistryError,
    },
}
