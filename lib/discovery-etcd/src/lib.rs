//! etcd integration
//!
//! - Connection setup from the process environment
//! - The registry adapter used by the synchronization engine
//! - Typed, live-reloadable settings stored in etcd

pub mod client;
pub mod config;
pub mod error;
pub mod registry;

pub use client::{Credentials, EtcdConnection, EtcdSettings};
pub use config::{LogLevel, Settings, SettingsSource, SettingsTable, StoredValue};
pub use error::ConfigError;
pub use registry::EtcdRegistry;
