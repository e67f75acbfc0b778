//! Container engine port.

use crate::container::domain::ContainerSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for container runtime operations.
pub type ContainerRuntimeResult<T> = Result<T, ContainerRuntimeError>;

/// Observed state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeState {
    /// Created but not yet running.
    Created,
    /// Running, with the address it is reachable on when the engine reports one.
    Running {
        /// Container address on its network.
        address: Option<String>,
    },
    /// Stopped or crashed.
    Exited {
        /// Exit status, when known.
        exit_code: Option<i64>,
    },
    /// The engine does not know the container.
    Missing,
}

/// A container carrying the fabric labels, as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    /// Engine container identifier.
    pub id: String,
    /// Container name without a leading `/`.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Labels attached at creation.
    pub labels: BTreeMap<String, String>,
    /// Whether the container is running.
    pub running: bool,
}

/// Engine contract used by the supervisor.
///
/// `stop` and `remove` treat an unknown container as success.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Makes `image` available locally, pulling it when absent.
    async fn ensure_image(&self, image: &str) -> ContainerRuntimeResult<()>;

    /// Creates a container and returns its identifier.
    async fn create(&self, spec: &ContainerSpec) -> ContainerRuntimeResult<String>;

    /// Starts a created container.
    async fn start(&self, container_id: &str) -> ContainerRuntimeResult<()>;

    /// Reports the container state.
    async fn inspect(&self, container_id: &str) -> ContainerRuntimeResult<RuntimeState>;

    /// Stops a container, waiting at most `grace` before it is killed.
    async fn stop(&self, container_id: &str, grace: Duration) -> ContainerRuntimeResult<()>;

    /// Force-removes a container and its anonymous volumes.
    async fn remove(&self, container_id: &str) -> ContainerRuntimeResult<()>;

    /// Lists containers, running or not, that carry `label`.
    async fn list_managed(&self, label: &str) -> ContainerRuntimeResult<Vec<ManagedContainer>>;
}

/// Errors returned by container runtime adapters.
#[derive(Debug, Clone, Error)]
pub enum ContainerRuntimeError {
    /// The container does not exist.
    #[error("container {0} not found")]
    NotFound(String),

    /// The image could not be pulled.
    #[error("image {image} is unavailable: {reason}")]
    ImageUnavailable {
        /// Image reference.
        image: String,
        /// Engine message.
        reason: String,
    },

    /// Generic engine failure.
    #[error("container runtime error: {0}")]
    Runtime(Arc<dyn std::error::Error + Send + Sync>),
}

impl ContainerRuntimeError {
    /// Wraps an engine error.
    #[must_use]
    pub fn runtime(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Runtime(Arc::new(err))
    }
}
