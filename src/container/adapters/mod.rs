//! Adapter implementations for the container context.

mod docker;
mod memory;

pub use docker::DockerContainerRuntime;
pub use memory::{InMemoryContainerRuntime, RuntimeCounters};
