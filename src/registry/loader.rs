//! YAML loading and validation of the fabric configuration.

use super::{
    ConfigError, ContainerStrategy, MemoryThreshold, ServiceDefinition, ServiceName,
    ToolDescriptor, parse_duration,
};
use crate::mount::AllowedRoots;
use camino::Utf8Path;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// The only configuration format version understood by this build.
pub const SUPPORTED_VERSION: &str = "1.0";

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8090";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    orchestrator: RawOrchestrator,
    #[serde(default)]
    mcp_services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrchestrator {
    #[serde(default)]
    allowed_mount_roots: Vec<String>,
    listen_address: Option<String>,
    idle_timeout: Option<RawDuration>,
    sweep_interval: Option<RawDuration>,
    shutdown_grace: Option<RawDuration>,
    start_timeout: Option<RawDuration>,
    network: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    image: Option<String>,
    container_strategy: Option<String>,
    max_calls_per_container: Option<u64>,
    max_container_age: Option<RawDuration>,
    memory_threshold: Option<RawScalar>,
    timeout: Option<RawDuration>,
    port: Option<u16>,
    #[serde(default)]
    tools: Vec<RawTool>,
    #[serde(default)]
    config: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTool {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn resolve(&self, field: impl Into<String>) -> Result<Duration, ConfigError> {
        match self {
            Self::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
            Self::Text(text) => parse_duration(text).ok_or_else(|| ConfigError::InvalidDuration {
                field: field.into(),
                value: text.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Number(u64),
    Text(String),
}

impl RawScalar {
    fn as_text(&self) -> String {
        match self {
            Self::Number(number) => number.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Orchestrator-wide settings from the `orchestrator` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    allowed_mount_roots: AllowedRoots,
    listen_address: SocketAddr,
    idle_timeout: Duration,
    sweep_interval: Duration,
    shutdown_grace: Duration,
    start_timeout: Duration,
    network: Option<String>,
}

impl OrchestratorSettings {
    /// Creates settings with default timings around the given allow-list.
    #[must_use]
    pub fn new(allowed_mount_roots: AllowedRoots) -> Self {
        Self {
            allowed_mount_roots,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 8090)),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            start_timeout: DEFAULT_START_TIMEOUT,
            network: None,
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub const fn with_listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    /// Sets the idle timeout after which unused containers are stopped.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the idle sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the grace period granted to connections on shutdown.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the bounded wait for a started container to report running.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the network containers are attached to.
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Returns the mount allow-list.
    #[must_use]
    pub const fn allowed_mount_roots(&self) -> &AllowedRoots {
        &self.allowed_mount_roots
    }

    /// Returns the address the server listens on.
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Returns the idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns the idle sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Returns the container start timeout.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    /// Returns the network containers join, if configured.
    #[must_use]
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }
}

/// Immutable set of validated service definitions plus orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistry {
    orchestrator: OrchestratorSettings,
    services: BTreeMap<ServiceName, ServiceDefinition>,
}

impl ServiceRegistry {
    /// Builds a registry from already validated parts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoServices`] for an empty service list and
    /// [`ConfigError::DuplicateService`] when two definitions share a name.
    pub fn new(
        orchestrator: OrchestratorSettings,
        services: impl IntoIterator<Item = ServiceDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut by_name = BTreeMap::new();
        for service in services {
            let name = service.name().clone();
            if by_name.insert(name.clone(), service).is_some() {
                return Err(ConfigError::DuplicateService(name.as_str().to_owned()));
            }
        }

        if by_name.is_empty() {
            return Err(ConfigError::NoServices);
        }

        Ok(Self {
            orchestrator,
            services: by_name,
        })
    }

    /// Parses and validates a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the document is malformed or any field
    /// fails validation.
    pub fn load_and_validate(bytes: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_slice(bytes).map_err(|err| ConfigError::Malformed(err.to_string()))?;

        check_version(raw.version.as_ref())?;
        let orchestrator = build_orchestrator(raw.orchestrator)?;
        let services = raw
            .mcp_services
            .into_iter()
            .map(|(key, service)| build_service(&key, service))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(orchestrator, services)
    }

    /// Reads and validates the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// the same errors as [`Self::load_and_validate`].
    pub fn load_from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|err| ConfigError::Io {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::load_and_validate(&bytes)
    }

    /// Returns the orchestrator-wide settings.
    #[must_use]
    pub const fn orchestrator(&self) -> &OrchestratorSettings {
        &self.orchestrator
    }

    /// Looks up a service by (unnormalised) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        let normalized = ServiceName::new(name).ok()?;
        self.services.get(&normalized)
    }

    /// Iterates services in name order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    /// Returns the number of configured services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` when no services are configured.
    ///
    /// A validated registry is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn check_version(version: Option<&serde_yaml::Value>) -> Result<(), ConfigError> {
    let rendered = match version {
        None | Some(serde_yaml::Value::Null) => return Err(ConfigError::MissingVersion),
        Some(serde_yaml::Value::String(text)) => text.trim().to_owned(),
        Some(serde_yaml::Value::Number(number)) => number.to_string(),
        Some(other) => format!("{other:?}"),
    };

    if rendered == SUPPORTED_VERSION {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedVersion(rendered))
    }
}

fn build_orchestrator(raw: RawOrchestrator) -> Result<OrchestratorSettings, ConfigError> {
    let roots = AllowedRoots::new(&raw.allowed_mount_roots)?;
    let mut settings = OrchestratorSettings::new(roots);

    let listen = raw
        .listen_address
        .as_deref()
        .unwrap_or(DEFAULT_LISTEN_ADDRESS)
        .trim();
    let address = listen
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::InvalidListenAddress(listen.to_owned()))?;
    settings = settings.with_listen_address(address);

    if let Some(value) = raw.idle_timeout {
        settings = settings.with_idle_timeout(value.resolve("orchestrator.idle_timeout")?);
    }
    if let Some(value) = raw.sweep_interval {
        let interval = value.resolve("orchestrator.sweep_interval")?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "orchestrator.sweep_interval".to_owned(),
                value: "0".to_owned(),
            });
        }
        settings = settings.with_sweep_interval(interval);
    }
    if let Some(value) = raw.shutdown_grace {
        settings = settings.with_shutdown_grace(value.resolve("orchestrator.shutdown_grace")?);
    }
    if let Some(value) = raw.start_timeout {
        settings = settings.with_start_timeout(value.resolve("orchestrator.start_timeout")?);
    }
    if let Some(network) = raw.network.map(|network| network.trim().to_owned())
        && !network.is_empty()
    {
        settings = settings.with_network(network);
    }

    Ok(settings)
}

fn build_service(key: &str, raw: RawService) -> Result<ServiceDefinition, ConfigError> {
    let name = ServiceName::new(key)?;
    let service = name.as_str().to_owned();
    let field = |suffix: &str| format!("mcp_services.{service}.{suffix}");

    let image = raw.image.unwrap_or_default();
    let mut definition = ServiceDefinition::new(name.clone(), image)?;

    if let Some(strategy) = raw.container_strategy {
        let parsed = ContainerStrategy::try_from(strategy.as_str()).map_err(|value| {
            ConfigError::InvalidStrategy {
                service: service.clone(),
                value,
            }
        })?;
        definition = definition.with_strategy(parsed);
    }

    if let Some(timeout) = raw.timeout {
        definition = definition.with_timeout(timeout.resolve(field("timeout"))?);
    }
    if let Some(port) = raw.port {
        definition = definition.with_port(port)?;
    }
    if let Some(max_calls) = raw.max_calls_per_container {
        definition = definition.with_max_calls_per_container(max_calls)?;
    }
    if let Some(max_age) = raw.max_container_age {
        definition = definition.with_max_container_age(max_age.resolve(field("max_container_age"))?);
    }
    if let Some(threshold) = raw.memory_threshold {
        let text = threshold.as_text();
        let parsed =
            MemoryThreshold::parse(&text).ok_or_else(|| ConfigError::InvalidMemoryThreshold {
                service: service.clone(),
                value: text,
            })?;
        definition = definition.with_memory_threshold(parsed);
    }

    let tools = raw
        .tools
        .into_iter()
        .map(|tool| ToolDescriptor::new(tool.name, tool.description));
    definition = definition.with_tools(tools)?;

    let config = raw
        .config
        .into_iter()
        .map(|(config_key, value)| {
            scalar_to_string(&value)
                .map(|text| (config_key.clone(), text))
                .ok_or_else(|| ConfigError::InvalidConfigValue {
                    service: service.clone(),
                    key: config_key,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    definition = definition.with_config(config);

    let has_thresholds = definition.max_calls_per_container().is_some()
        || definition.max_container_age().is_some();
    if has_thresholds && definition.strategy() != ContainerStrategy::SmartRefresh {
        warn!(
            service = %name,
            strategy = %definition.strategy(),
            "refresh thresholds only apply to smart_refresh and will be ignored"
        );
    }

    Ok(definition)
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_)
        | serde_yaml::Value::Tagged(_) => None,
    }
}
