//! Core service discovery functionality
//!
//! This library provides:
//! - Container metadata and lifecycle event model
//! - Mapping from discovery labels to service registrations and registry keys
//! - Registry and container runtime abstractions
//! - The synchronization engine driving registry writes from runtime events

pub mod container;
pub mod engine;
pub mod error;
pub mod keys;
pub mod registration;
pub mod registry;
pub mod runtime;

pub use container::{
    ContainerMetadata, EventAction, LifecycleEvent, NetworkAttachment, PortBinding, PublishedPort,
};
pub use engine::{EngineDeps, EngineHandle, EventOutcome, SyncEngine};
pub use error::{CoreError, RegistryError, RuntimeError, ValidationError};
pub use keys::RegistryKeySet;
pub use registration::{map_registration, ServiceIdentity, ServiceRegistration};
pub use registry::{KeyValueRegistry, MemoryRegistry, RegistryOp};
pub use runtime::{ContainerRuntime, EventSubscription};
