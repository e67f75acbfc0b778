//! Validated service registry loaded from the fabric configuration file.
//!
//! The registry is built once at start-up from YAML. Defaults are applied in
//! place before dependent fields are validated, so every
//! [`ServiceDefinition`] handed to the rest of the crate is fully populated
//! and immutable.

mod error;
mod loader;
mod service;
mod units;

pub use error::ConfigError;
pub use loader::{OrchestratorSettings, SUPPORTED_VERSION, ServiceRegistry};
pub use service::{
    ContainerStrategy, DEFAULT_SERVICE_PORT, DEFAULT_SERVICE_TIMEOUT, RESERVED_SERVICE_NAMES,
    ServiceDefinition, ServiceName, ToolDescriptor,
};
pub use units::{MemoryThreshold, parse_duration};
