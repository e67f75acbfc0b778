//! Engine-neutral description of a container to create.

use super::ContainerKey;
use crate::mount::MountSpec;
use crate::registry::ServiceDefinition;
use crate::session::ClientContext;
use camino::Utf8PathBuf;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Prefix shared by every managed container name.
pub const CONTAINER_NAME_PREFIX: &str = "reactor-fabric";
/// Label carrying the service name.
pub const LABEL_SERVICE: &str = "reactor-fabric.service";
/// Label carrying the owning session identifier.
pub const LABEL_SESSION: &str = "reactor-fabric.session";
/// Label carrying the RFC 3339 creation time.
pub const LABEL_CREATED: &str = "reactor-fabric.created";
/// Label carrying the container key.
pub const LABEL_KEY: &str = "reactor-fabric.key";

/// A host directory bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    source: Utf8PathBuf,
    target: Utf8PathBuf,
    read_only: bool,
}

impl BindMount {
    /// Returns the host path.
    #[must_use]
    pub const fn source(&self) -> &Utf8PathBuf {
        &self.source
    }

    /// Returns the container path.
    #[must_use]
    pub const fn target(&self) -> &Utf8PathBuf {
        &self.target
    }

    /// Returns `true` for read-only binds.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Renders the bind in `source:target[:ro]` form.
    #[must_use]
    pub fn to_bind_string(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

impl From<&MountSpec> for BindMount {
    fn from(mount: &MountSpec) -> Self {
        Self {
            source: mount.source().to_path_buf(),
            target: mount.target().to_path_buf(),
            read_only: mount.read_only(),
        }
    }
}

/// Everything a runtime needs to create one service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    name: String,
    image: String,
    labels: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    mounts: Vec<BindMount>,
    network: Option<String>,
    port: u16,
}

impl ContainerSpec {
    /// Builds the spec for `service` on behalf of `context` at slot `key`.
    #[must_use]
    pub fn for_service(
        service: &ServiceDefinition,
        context: &ClientContext,
        key: &ContainerKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        let labels = BTreeMap::from([
            (LABEL_SERVICE.to_owned(), service.name().as_str().to_owned()),
            (LABEL_SESSION.to_owned(), context.session_id().to_string()),
            (
                LABEL_CREATED.to_owned(),
                created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (LABEL_KEY.to_owned(), key.to_string()),
        ]);

        Self {
            name: key.container_name(),
            image: service.image().to_owned(),
            labels,
            env: service.config().clone(),
            mounts: context.mounts().iter().map(BindMount::from).collect(),
            network: None,
            port: service.port(),
        }
    }

    /// Attaches the container to a named network.
    #[must_use]
    pub fn with_network(mut self, network: Option<&str>) -> Self {
        self.network = network.map(str::to_owned);
        self
    }

    /// Returns the container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns the container labels.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns the container environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns the bind mounts.
    #[must_use]
    pub fn mounts(&self) -> &[BindMount] {
        &self.mounts
    }

    /// Returns the network to join, if any.
    #[must_use]
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Returns the port the service listens on inside the container.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Renders the environment as `KEY=value` pairs.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }
}
