//! Live container record.

use super::ContainerKey;
use crate::registry::ServiceName;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Network location of a service inside its container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceEndpoint {
    host: String,
    port: u16,
}

impl ServiceEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns an `http://` URL for `path` on this endpoint.
    #[must_use]
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{self}{path}")
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.host, self.port)
    }
}

/// Parameter object describing a container that has just reached running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedContainer {
    /// Engine-assigned container identifier.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Image the container runs.
    pub image: String,
    /// Table slot the container occupies.
    pub key: ContainerKey,
    /// Where the service accepts requests.
    pub endpoint: ServiceEndpoint,
    /// Time the container reported running.
    pub started_at: DateTime<Utc>,
}

/// A live backing container tracked by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInstance {
    id: String,
    name: String,
    image: String,
    key: ContainerKey,
    endpoint: ServiceEndpoint,
    start_time: DateTime<Utc>,
    last_used: DateTime<Utc>,
    call_count: u64,
}

impl ContainerInstance {
    /// Creates a record for a freshly started container with no calls.
    #[must_use]
    pub fn new(started: StartedContainer) -> Self {
        Self {
            id: started.id,
            name: started.name,
            image: started.image,
            key: started.key,
            endpoint: started.endpoint,
            start_time: started.started_at,
            last_used: started.started_at,
            call_count: 0,
        }
    }

    /// Returns the engine container identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
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

    /// Returns the service this container backs.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        self.key.service()
    }

    /// Returns the session that caused the container to start.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.key.session_id()
    }

    /// Returns the table key.
    #[must_use]
    pub const fn key(&self) -> &ContainerKey {
        &self.key
    }

    /// Returns the service endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Returns when the container reported running.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Returns when the container last served a call.
    #[must_use]
    pub const fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    /// Returns the number of calls served.
    #[must_use]
    pub const fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Counts one served call at `at`.
    pub fn record_call(&mut self, at: DateTime<Utc>) {
        self.call_count = self.call_count.saturating_add(1);
        self.last_used = self.last_used.max(at);
    }

    /// Marks the container as handed out at `at` without counting a call.
    pub fn mark_leased(&mut self, at: DateTime<Utc>) {
        self.last_used = self.last_used.max(at);
    }

    /// Returns the container age at `now`, zero if `now` precedes the start.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns how long the container has been unused at `now`.
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_used).to_std().unwrap_or(Duration::ZERO)
    }
}
