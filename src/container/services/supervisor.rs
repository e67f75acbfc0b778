//! Container supervisor: the single owner of the live container table.

use crate::container::{
    domain::{
        ContainerInstance, ContainerKey, ContainerSpec, LABEL_SERVICE, ServiceEndpoint,
        StartedContainer, should_refresh,
    },
    ports::{ContainerRuntime, ContainerRuntimeError, ManagedContainer, RuntimeState},
};
use crate::registry::{OrchestratorSettings, ServiceDefinition};
use crate::session::ClientContext;
use futures::future::join_all;
use mockable::Clock;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timing and placement settings for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    start_timeout: Duration,
    stop_grace: Duration,
    poll_interval: Duration,
    network: Option<String>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            network: None,
        }
    }
}

impl SupervisorSettings {
    /// Derives supervisor settings from the orchestrator configuration.
    #[must_use]
    pub fn from_orchestrator(settings: &OrchestratorSettings) -> Self {
        Self {
            start_timeout: settings.start_timeout(),
            network: settings.network().map(str::to_owned),
            ..Self::default()
        }
    }

    /// Sets the bounded wait for a container to report running.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the grace period passed to the engine when stopping.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Sets the interval between state polls while starting.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the start timeout.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    /// Returns the stop grace period.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        self.stop_grace
    }
}

/// Errors surfaced by the supervisor.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// The engine rejected an image pull, create or start.
    #[error("failed to start container for service {service}: {reason}")]
    StartFailure {
        /// Service name.
        service: String,
        /// Engine message.
        reason: String,
    },

    /// The container did not report running in time.
    #[error("container for service {service} did not report running within {timeout:?}")]
    StartTimeout {
        /// Service name.
        service: String,
        /// Configured start timeout.
        timeout: Duration,
    },

    /// The container stopped before reporting running.
    #[error("container for service {service} exited during start (exit code {exit_code:?})")]
    ExitedDuringStart {
        /// Service name.
        service: String,
        /// Exit status, when known.
        exit_code: Option<i64>,
    },

    /// Engine query failure outside a start.
    #[error(transparent)]
    Runtime(#[from] ContainerRuntimeError),
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Default)]
struct ContainerSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    instance: Option<ContainerInstance>,
    failure: Option<SupervisorError>,
    retired: bool,
}

/// Decides when to start, reuse, refresh and stop service containers.
///
/// Each [`ContainerKey`] maps to a slot guarded by its own async mutex. The
/// table lock is only held to look up, insert or detach slots, so starts for
/// different keys proceed in parallel while concurrent resolves of one key
/// share a single start.
pub struct ContainerSupervisor<R, C>
where
    R: ContainerRuntime,
    C: Clock + Send + Sync,
{
    runtime: Arc<R>,
    clock: Arc<C>,
    settings: SupervisorSettings,
    slots: Arc<RwLock<HashMap<ContainerKey, Arc<ContainerSlot>>>>,
}

impl<R, C> Clone for ContainerSupervisor<R, C>
where
    R: ContainerRuntime,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<R, C> ContainerSupervisor<R, C>
where
    R: ContainerRuntime,
    C: Clock + Send + Sync,
{
    /// Creates a supervisor with an empty container table.
    #[must_use]
    pub fn new(runtime: Arc<R>, clock: Arc<C>, settings: SupervisorSettings) -> Self {
        Self {
            runtime,
            clock,
            settings,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the container serving the next call to `service`.
    ///
    /// Reuses the live container for the derived key unless it is due for
    /// refresh, in which case it is stopped and replaced. Concurrent callers
    /// for one key wait for a single start and all observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when a container has to be started and the
    /// start fails.
    pub async fn resolve(
        &self,
        service: &ServiceDefinition,
        context: &ClientContext,
        call_sequence: u64,
    ) -> SupervisorResult<ContainerInstance> {
        let key = ContainerKey::for_strategy(
            service.name(),
            context.session_id(),
            service.strategy(),
            call_sequence,
        );

        loop {
            let slot = self.slot_for(&key);
            let mut state = slot.state.lock().await;

            if state.retired {
                if let Some(failure) = state.failure.clone() {
                    return Err(failure);
                }
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }

            if let Some(mut current) = state.instance.take() {
                let now = self.clock.utc();
                if !should_refresh(&current, service, now) {
                    debug!(key = %key, container = %current.name(), "reusing container");
                    current.mark_leased(now);
                    state.instance = Some(current.clone());
                    return Ok(current);
                }
                info!(
                    key = %key,
                    container = %current.name(),
                    calls = current.call_count(),
                    "refreshing container"
                );
                self.teardown(&current).await;
            }

            return match self.start(service, context, &key).await {
                Ok(instance) => {
                    state.instance = Some(instance.clone());
                    Ok(instance)
                }
                Err(error) => {
                    state.failure = Some(error.clone());
                    state.retired = true;
                    drop(state);
                    self.detach(&key, &slot);
                    Err(error)
                }
            };
        }
    }

    /// Creates and starts a container for `key` and waits until it runs.
    ///
    /// The container is not entered into the table; [`Self::resolve`] does
    /// that. Any partially created container is removed before an error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::StartFailure`] for engine errors,
    /// [`SupervisorError::StartTimeout`] when the container does not run in
    /// time and [`SupervisorError::ExitedDuringStart`] when it exits first.
    pub async fn start(
        &self,
        service: &ServiceDefinition,
        context: &ClientContext,
        key: &ContainerKey,
    ) -> SupervisorResult<ContainerInstance> {
        let spec = ContainerSpec::for_service(service, context, key, self.clock.utc())
            .with_network(self.settings.network.as_deref());
        info!(
            service = %service.name(),
            key = %key,
            container = %spec.name(),
            image = %spec.image(),
            "starting container"
        );

        self.runtime
            .ensure_image(spec.image())
            .await
            .map_err(|error| start_failure(service, &error))?;
        let pending = PendingContainer {
            runtime: Arc::clone(&self.runtime),
            container_id: self
                .runtime
                .create(&spec)
                .await
                .map_err(|error| start_failure(service, &error))?,
            armed: true,
        };

        let launched = self.launch(service, &pending.container_id).await;
        let container_id = pending.disarm();
        let address = match launched {
            Ok(reported) => reported,
            Err(error) => {
                warn!(
                    service = %service.name(),
                    container = %spec.name(),
                    error = %error,
                    "container failed to start, discarding"
                );
                if let Err(cleanup) = self.runtime.remove(&container_id).await {
                    warn!(container = %spec.name(), error = %cleanup, "failed to remove container");
                }
                return Err(error);
            }
        };

        let host = address.unwrap_or_else(|| spec.name().to_owned());
        let instance = ContainerInstance::new(StartedContainer {
            id: container_id,
            name: spec.name().to_owned(),
            image: spec.image().to_owned(),
            key: key.clone(),
            endpoint: ServiceEndpoint::new(host, spec.port()),
            started_at: self.clock.utc(),
        });
        info!(
            service = %service.name(),
            container = %instance.name(),
            endpoint = %instance.endpoint(),
            "container running"
        );
        Ok(instance)
    }

    /// Stops `instance`, evicting it first if it is still the live entry for
    /// its key.
    ///
    /// Engine errors are logged, never returned.
    pub async fn stop(&self, instance: &ContainerInstance) {
        if let Some(slot) = self.existing_slot(instance.key()) {
            let mut state = slot.state.lock().await;
            let is_live = state
                .instance
                .as_ref()
                .is_some_and(|live| live.id() == instance.id());
            if is_live {
                state.instance = None;
                state.retired = true;
                drop(state);
                self.detach(instance.key(), &slot);
            }
        }
        self.teardown(instance).await;
    }

    /// Returns `true` when `instance` is due for replacement.
    #[must_use]
    pub fn should_refresh(&self, instance: &ContainerInstance, service: &ServiceDefinition) -> bool {
        should_refresh(instance, service, self.clock.utc())
    }

    /// Counts a served call on the live entry matching `instance`.
    ///
    /// Returns the updated record, or `None` when the container is no longer
    /// live.
    pub async fn record_call(&self, instance: &ContainerInstance) -> Option<ContainerInstance> {
        let slot = self.existing_slot(instance.key())?;
        let mut state = slot.state.lock().await;
        let live = state
            .instance
            .as_mut()
            .filter(|live| live.id() == instance.id())?;
        live.record_call(self.clock.utc());
        Some(live.clone())
    }

    /// Stops every container unused for at least `idle_timeout`.
    ///
    /// Slots locked by an in-flight resolve are skipped until the next sweep.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Vec<ContainerInstance> {
        let now = self.clock.utc();
        let mut swept = Vec::new();

        for (key, slot) in self.snapshot() {
            let Ok(mut state) = slot.state.try_lock() else {
                continue;
            };
            let is_idle = state
                .instance
                .as_ref()
                .is_some_and(|instance| instance.idle_for(now) >= idle_timeout);
            if !is_idle {
                continue;
            }
            if let Some(instance) = state.instance.take() {
                state.retired = true;
                drop(state);
                self.detach(&key, &slot);
                swept.push(instance);
            }
        }

        for instance in &swept {
            info!(key = %instance.key(), container = %instance.name(), "stopping idle container");
            self.teardown(instance).await;
        }
        swept
    }

    /// Stops every tracked container and empties the table.
    pub async fn shutdown(&self) -> Vec<ContainerInstance> {
        let mut drained = Vec::new();
        for (key, slot) in self.snapshot() {
            let mut state = slot.state.lock().await;
            state.retired = true;
            if let Some(instance) = state.instance.take() {
                drained.push(instance);
            }
            drop(state);
            self.detach(&key, &slot);
        }

        join_all(drained.iter().map(|instance| self.teardown(instance))).await;
        info!(stopped = drained.len(), "supervisor shut down");
        drained
    }

    /// Returns a snapshot of the live containers.
    pub async fn instances(&self) -> Vec<ContainerInstance> {
        let mut live = Vec::new();
        for (_, slot) in self.snapshot() {
            if let Some(instance) = slot.state.lock().await.instance.clone() {
                live.push(instance);
            }
        }
        live.sort_by(|left, right| left.key().cmp(right.key()));
        live
    }

    /// Lists every container carrying the fabric service label, tracked or not.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Runtime`] when the engine query fails.
    pub async fn discover_managed(&self) -> SupervisorResult<Vec<ManagedContainer>> {
        Ok(self.runtime.list_managed(LABEL_SERVICE).await?)
    }

    /// Stops and removes labelled containers that are not in the table.
    ///
    /// Returns the number of containers removed.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Runtime`] when the engine query fails.
    pub async fn reap_orphans(&self) -> SupervisorResult<usize> {
        let tracked: Vec<String> = self
            .instances()
            .await
            .into_iter()
            .map(|instance| instance.id().to_owned())
            .collect();
        let orphans: Vec<ManagedContainer> = self
            .discover_managed()
            .await?
            .into_iter()
            .filter(|container| !tracked.contains(&container.id))
            .collect();

        for orphan in &orphans {
            info!(container = %orphan.name, "removing orphaned container");
            if let Err(error) = self.runtime.stop(&orphan.id, self.settings.stop_grace).await {
                warn!(container = %orphan.name, error = %error, "failed to stop orphan");
            }
            if let Err(error) = self.runtime.remove(&orphan.id).await {
                warn!(container = %orphan.name, error = %error, "failed to remove orphan");
            }
        }
        Ok(orphans.len())
    }

    async fn launch(
        &self,
        service: &ServiceDefinition,
        container_id: &str,
    ) -> SupervisorResult<Option<String>> {
        self.runtime
            .start(container_id)
            .await
            .map_err(|error| start_failure(service, &error))?;

        let wait_for_running = async {
            loop {
                match self.runtime.inspect(container_id).await {
                    Ok(RuntimeState::Running { address }) => return Ok(address),
                    Ok(RuntimeState::Exited { exit_code }) => {
                        return Err(SupervisorError::ExitedDuringStart {
                            service: service.name().as_str().to_owned(),
                            exit_code,
                        });
                    }
                    Ok(RuntimeState::Missing) => {
                        return Err(SupervisorError::StartFailure {
                            service: service.name().as_str().to_owned(),
                            reason: "container disappeared during start".to_owned(),
                        });
                    }
                    Ok(RuntimeState::Created) => {}
                    Err(error) => return Err(start_failure(service, &error)),
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        };

        tokio::time::timeout(self.settings.start_timeout, wait_for_running)
            .await
            .map_err(|_| SupervisorError::StartTimeout {
                service: service.name().as_str().to_owned(),
                timeout: self.settings.start_timeout,
            })?
    }

    async fn teardown(&self, instance: &ContainerInstance) {
        debug!(key = %instance.key(), container = %instance.name(), "tearing down container");
        if let Err(error) = self.runtime.stop(instance.id(), self.settings.stop_grace).await {
            warn!(container = %instance.name(), error = %error, "failed to stop container");
        }
        if let Err(error) = self.runtime.remove(instance.id()).await {
            warn!(container = %instance.name(), error = %error, "failed to remove container");
        }
    }

    fn slot_for(&self, key: &ContainerKey) -> Arc<ContainerSlot> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        Arc::clone(self.write_slots().entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &ContainerKey) -> Option<Arc<ContainerSlot>> {
        self.read_slots().get(key).cloned()
    }

    fn detach(&self, key: &ContainerKey, slot: &Arc<ContainerSlot>) {
        let mut slots = self.write_slots();
        let is_current = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if is_current {
            slots.remove(key);
        }
    }

    fn snapshot(&self) -> Vec<(ContainerKey, Arc<ContainerSlot>)> {
        self.read_slots()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<ContainerKey, Arc<ContainerSlot>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<ContainerKey, Arc<ContainerSlot>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A created container that has not reached the table yet.
///
/// Dropping it while armed, as happens when a start is cancelled mid-launch,
/// schedules removal of the container on the current runtime.
struct PendingContainer<R: ContainerRuntime> {
    runtime: Arc<R>,
    container_id: String,
    armed: bool,
}

impl<R: ContainerRuntime> PendingContainer<R> {
    fn disarm(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.container_id)
    }
}

impl<R: ContainerRuntime> Drop for PendingContainer<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let container_id = std::mem::take(&mut self.container_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %container_id, "start abandoned outside a runtime, container left behind");
            return;
        };
        let runtime = Arc::clone(&self.runtime);
        handle.spawn(async move {
            warn!(container = %container_id, "start abandoned, removing container");
            if let Err(error) = runtime.remove(&container_id).await {
                warn!(container = %container_id, error = %error, "failed to remove container");
            }
        });
    }
}

fn start_failure(service: &ServiceDefinition, error: &ContainerRuntimeError) -> SupervisorError {
    SupervisorError::StartFailure {
        service: service.name().as_str().to_owned(),
        reason: error.to_string(),
    }
}
