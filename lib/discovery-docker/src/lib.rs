//! Docker Engine API integration
//!
//! Implements the container runtime seam of the synchronization engine:
//! a reconnecting lifecycle event subscription and container inspection.

pub mod client;
pub mod events;
pub mod inspect;
pub mod runtime;

pub use client::{DockerClient, DockerHost, DEFAULT_DOCKER_HOST};
pub use events::EventDecoder;
pub use runtime::DockerRuntime;
