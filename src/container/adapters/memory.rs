//! In-memory container runtime for tests and dry runs.

use crate::container::{
    domain::ContainerSpec,
    ports::{
        ContainerRuntime, ContainerRuntimeError, ContainerRuntimeResult, ManagedContainer,
        RuntimeState,
    },
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const IN_MEMORY_ADDRESS: &str = "127.0.0.1";

/// Operation counts observed by an [`InMemoryContainerRuntime`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCounters {
    /// Containers created.
    pub created: usize,
    /// Containers started.
    pub started: usize,
    /// Stop requests for known containers.
    pub stopped: usize,
    /// Containers removed.
    pub removed: usize,
    /// Containers currently present.
    pub live: usize,
}

/// Container runtime that models engine behaviour without an engine.
///
/// Started containers run immediately unless their image was configured to
/// fail or exit. An optional delay on `create` widens race windows in
/// concurrency tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContainerRuntime {
    state: Arc<RwLock<InMemoryRuntimeState>>,
}

#[derive(Debug, Default)]
struct InMemoryRuntimeState {
    containers: BTreeMap<String, FakeContainer>,
    next_id: u64,
    create_delay: Option<Duration>,
    failing_images: HashMap<String, String>,
    exiting_images: HashMap<String, i64>,
    counters: RuntimeCounters,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    state: RuntimeState,
}

impl InMemoryContainerRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `create` call by `delay`.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn set_create_delay(&self, delay: Duration) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        state.create_delay = Some(delay);
        Ok(())
    }

    /// Makes pulls of `image` fail with `reason`.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn fail_image(
        &self,
        image: impl Into<String>,
        reason: impl Into<String>,
    ) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        state.failing_images.insert(image.into(), reason.into());
        Ok(())
    }

    /// Makes containers of `image` exit with `exit_code` as soon as they start.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn exit_on_start(
        &self,
        image: impl Into<String>,
        exit_code: i64,
    ) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        state.exiting_images.insert(image.into(), exit_code);
        Ok(())
    }

    /// Returns operation counts.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn counters(&self) -> ContainerRuntimeResult<RuntimeCounters> {
        let state = self.read_state()?;
        Ok(RuntimeCounters {
            live: state.containers.len(),
            ..state.counters
        })
    }

    /// Returns the specs of every container currently present.
    ///
    /// # Errors
    ///
    /// Returns runtime errors when lock acquisition fails.
    pub fn live_specs(&self) -> ContainerRuntimeResult<Vec<ContainerSpec>> {
        let state = self.read_state()?;
        Ok(state
            .containers
            .values()
            .map(|container| container.spec.clone())
            .collect())
    }

    fn read_state(
        &self,
    ) -> ContainerRuntimeResult<std::sync::RwLockReadGuard<'_, InMemoryRuntimeState>> {
        self.state
            .read()
            .map_err(|err| ContainerRuntimeError::runtime(std::io::Error::other(err.to_string())))
    }

    fn write_state(
        &self,
    ) -> ContainerRuntimeResult<std::sync::RwLockWriteGuard<'_, InMemoryRuntimeState>> {
        self.state
            .write()
            .map_err(|err| ContainerRuntimeError::runtime(std::io::Error::other(err.to_string())))
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn ensure_image(&self, image: &str) -> ContainerRuntimeResult<()> {
        let state = self.read_state()?;
        match state.failing_images.get(image) {
            Some(reason) => Err(ContainerRuntimeError::ImageUnavailable {
                image: image.to_owned(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> ContainerRuntimeResult<String> {
        let delay = self.read_state()?.create_delay;
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }

        let mut state = self.write_state()?;
        let name_taken = state
            .containers
            .values()
            .any(|container| container.spec.name() == spec.name());
        if name_taken {
            return Err(ContainerRuntimeError::runtime(std::io::Error::other(
                format!("container name {} is already in use", spec.name()),
            )));
        }

        state.next_id = state.next_id.saturating_add(1);
        let container_id = format!("mem-{:012x}", state.next_id);
        state.containers.insert(
            container_id.clone(),
            FakeContainer {
                spec: spec.clone(),
                state: RuntimeState::Created,
            },
        );
        state.counters.created = state.counters.created.saturating_add(1);
        Ok(container_id)
    }

    async fn start(&self, container_id: &str) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        let exit_codes = state.exiting_images.clone();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ContainerRuntimeError::NotFound(container_id.to_owned()))?;

        container.state = exit_codes.get(container.spec.image()).map_or_else(
            || RuntimeState::Running {
                address: Some(IN_MEMORY_ADDRESS.to_owned()),
            },
            |code| RuntimeState::Exited {
                exit_code: Some(*code),
            },
        );
        state.counters.started = state.counters.started.saturating_add(1);
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> ContainerRuntimeResult<RuntimeState> {
        let state = self.read_state()?;
        Ok(state
            .containers
            .get(container_id)
            .map_or(RuntimeState::Missing, |container| container.state.clone()))
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        if let Some(container) = state.containers.get_mut(container_id) {
            container.state = RuntimeState::Exited { exit_code: Some(0) };
            state.counters.stopped = state.counters.stopped.saturating_add(1);
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> ContainerRuntimeResult<()> {
        let mut state = self.write_state()?;
        if state.containers.remove(container_id).is_some() {
            state.counters.removed = state.counters.removed.saturating_add(1);
        }
        Ok(())
    }

    async fn list_managed(&self, label: &str) -> ContainerRuntimeResult<Vec<ManagedContainer>> {
        let state = self.read_state()?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, container)| container.spec.labels().contains_key(label))
            .map(|(container_id, container)| ManagedContainer {
                id: container_id.clone(),
                name: container.spec.name().to_owned(),
                image: container.spec.image().to_owned(),
                labels: container.spec.labels().clone(),
                running: matches!(container.state, RuntimeState::Running { .. }),
            })
            .collect())
    }
}
