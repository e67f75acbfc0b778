//! Service definition aggregate and its value objects.

use super::{ConfigError, MemoryThreshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Names that clash with the orchestrator's own tool namespace.
pub const RESERVED_SERVICE_NAMES: [&str; 3] = ["fabric", "orchestrator", "system"];

/// Upstream request timeout applied when a service does not set one.
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Port inside the container on which services accept JSON-RPC over HTTP.
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

/// Validated MCP service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a validated service name.
    ///
    /// The input is trimmed and lowercased. Only `[a-z0-9_-]` is accepted, and
    /// the reserved names in [`RESERVED_SERVICE_NAMES`] are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let normalized = value.into().trim().to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }

        let is_valid = normalized.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || character == '_'
                || character == '-'
        });
        if !is_valid {
            return Err(ConfigError::InvalidServiceName(normalized));
        }

        if RESERVED_SERVICE_NAMES.contains(&normalized.as_str()) {
            return Err(ConfigError::ReservedServiceName(normalized));
        }

        Ok(Self(normalized))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Container reuse policy for a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStrategy {
    /// One container per client session for the service.
    #[default]
    PerSession,
    /// A fresh container for every call.
    PerCall,
    /// One container per session, rotated when call-count or age thresholds
    /// are reached.
    SmartRefresh,
}

impl ContainerStrategy {
    /// Returns the canonical configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerSession => "per_session",
            Self::PerCall => "per_call",
            Self::SmartRefresh => "smart_refresh",
        }
    }
}

impl fmt::Display for ContainerStrategy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ContainerStrategy {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "per_session" | "persession" => Ok(Self::PerSession),
            "per_call" | "percall" => Ok(Self::PerCall),
            "smart_refresh" | "smartrefresh" => Ok(Self::SmartRefresh),
            _ => Err(value.to_owned()),
        }
    }
}

/// A tool advertised for a service in the `initialize` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    name: String,
    description: String,
}

impl ToolDescriptor {
    /// Creates a tool descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            description: description.into().trim().to_owned(),
        }
    }

    /// Returns the tool name without the service prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Static description of a container-backed MCP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    name: ServiceName,
    image: String,
    strategy: ContainerStrategy,
    max_calls_per_container: Option<u64>,
    max_container_age: Option<Duration>,
    memory_threshold: Option<MemoryThreshold>,
    timeout: Duration,
    port: u16,
    tools: Vec<ToolDescriptor>,
    config: BTreeMap<String, String>,
}

impl ServiceDefinition {
    /// Creates a definition with default strategy, timeout and port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidImage`] when `image` is not a valid
    /// image reference.
    pub fn new(name: ServiceName, image: impl Into<String>) -> Result<Self, ConfigError> {
        let normalized_image = image.into().trim().to_owned();
        if !is_valid_image_reference(&normalized_image) {
            return Err(ConfigError::InvalidImage {
                service: name.as_str().to_owned(),
                image: normalized_image,
            });
        }

        Ok(Self {
            name,
            image: normalized_image,
            strategy: ContainerStrategy::default(),
            max_calls_per_container: None,
            max_container_age: None,
            memory_threshold: None,
            timeout: DEFAULT_SERVICE_TIMEOUT,
            port: DEFAULT_SERVICE_PORT,
            tools: Vec::new(),
            config: BTreeMap::new(),
        })
    }

    /// Sets the container strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ContainerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the maximum number of calls served by one container.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxCalls`] when `max_calls` is zero.
    pub fn with_max_calls_per_container(mut self, max_calls: u64) -> Result<Self, ConfigError> {
        if max_calls == 0 {
            return Err(ConfigError::InvalidMaxCalls(self.name.as_str().to_owned()));
        }
        self.max_calls_per_container = Some(max_calls);
        Ok(self)
    }

    /// Sets the maximum age of a container before it is rotated.
    #[must_use]
    pub const fn with_max_container_age(mut self, max_age: Duration) -> Self {
        self.max_container_age = Some(max_age);
        self
    }

    /// Sets the memory refresh threshold.
    #[must_use]
    pub const fn with_memory_threshold(mut self, threshold: MemoryThreshold) -> Self {
        self.memory_threshold = Some(threshold);
        self
    }

    /// Sets the upstream request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the container port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] when `port` is zero.
    pub fn with_port(mut self, port: u16) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(self.name.as_str().to_owned()));
        }
        self.port = port;
        Ok(self)
    }

    /// Replaces the advertised tools.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidToolName`] when a tool name is empty or
    /// contains `/`.
    pub fn with_tools(
        mut self,
        tools: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<Self, ConfigError> {
        let collected: Vec<ToolDescriptor> = tools.into_iter().collect();
        if let Some(invalid) = collected
            .iter()
            .find(|tool| tool.name().is_empty() || tool.name().contains('/'))
        {
            return Err(ConfigError::InvalidToolName {
                service: self.name.as_str().to_owned(),
                tool: invalid.name().to_owned(),
            });
        }
        self.tools = collected;
        Ok(self)
    }

    /// Replaces the environment forwarded to containers.
    #[must_use]
    pub fn with_config(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        self.config = values.into_iter().collect();
        self
    }

    /// Returns the service name.
    #[must_use]
    pub const fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Returns the container image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Returns the container strategy.
    #[must_use]
    pub const fn strategy(&self) -> ContainerStrategy {
        self.strategy
    }

    /// Returns the call-count refresh threshold.
    #[must_use]
    pub const fn max_calls_per_container(&self) -> Option<u64> {
        self.max_calls_per_container
    }

    /// Returns the age refresh threshold.
    #[must_use]
    pub const fn max_container_age(&self) -> Option<Duration> {
        self.max_container_age
    }

    /// Returns the memory refresh threshold (not enforced).
    #[must_use]
    pub const fn memory_threshold(&self) -> Option<MemoryThreshold> {
        self.memory_threshold
    }

    /// Returns the upstream request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the container port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the advertised tools.
    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Returns the environment forwarded to containers.
    #[must_use]
    pub const fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }
}

/// Checks the shape `[registry[:port]/]path[:tag][@digest]`.
fn is_valid_image_reference(image: &str) -> bool {
    if image.is_empty() || image.chars().any(char::is_whitespace) {
        return false;
    }

    let (without_digest, digest) = image
        .split_once('@')
        .map_or((image, None), |(head, digest)| (head, Some(digest)));
    if let Some(digest_part) = digest {
        let Some((algorithm, hex)) = digest_part.split_once(':') else {
            return false;
        };
        let digest_ok = !algorithm.is_empty()
            && hex.len() >= 32
            && hex.chars().all(|character| character.is_ascii_hexdigit());
        if !digest_ok {
            return false;
        }
    }

    let last_slash = without_digest.rfind('/').map_or(0, |index| index + 1);
    let (prefix, last_segment) = without_digest.split_at(last_slash);
    let (repository_tail, tag) = last_segment
        .split_once(':')
        .map_or((last_segment, None), |(head, tag)| (head, Some(tag)));
    if let Some(tag_part) = tag {
        let tag_ok = !tag_part.is_empty()
            && tag_part.len() <= 128
            && tag_part.chars().all(|character| {
                character.is_ascii_alphanumeric() || matches!(character, '_' | '.' | '-')
            });
        if !tag_ok {
            return false;
        }
    }

    let mut segments: Vec<&str> = prefix
        .strip_suffix('/')
        .map_or_else(Vec::new, |head| head.split('/').collect());
    let registry = match segments.first() {
        Some(&first) if first.contains('.') || first.contains(':') || first == "localhost" => {
            segments.remove(0);
            Some(first)
        }
        _ => None,
    };
    if let Some(registry_host) = registry {
        let registry_ok = registry_host.chars().all(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | ':')
        });
        if !registry_ok {
            return false;
        }
    }

    segments.push(repository_tail);
    segments.iter().all(|segment| is_valid_path_component(segment))
}

fn is_valid_path_component(segment: &str) -> bool {
    let is_alphanumeric = |character: char| {
        character.is_ascii_lowercase() || character.is_ascii_digit()
    };
    let starts_and_ends_alphanumeric = segment
        .chars()
        .next()
        .zip(segment.chars().last())
        .is_some_and(|(first, last)| is_alphanumeric(first) && is_alphanumeric(last));
    starts_and_ends_alphanumeric
        && segment.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || matches!(character, '.' | '_' | '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("filesystem", "filesystem")]
    #[case("  Git ", "git")]
    #[case("web-search_2", "web-search_2")]
    fn service_names_normalize(#[case] input: &str, #[case] expected: &str) {
        let name = ServiceName::new(input).expect("valid service name");

        assert_eq!(name.as_str(), expected);
    }

    #[rstest]
    #[case("fabric")]
    #[case("Orchestrator")]
    #[case("system")]
    fn reserved_names_are_rejected(#[case] input: &str) {
        let result = ServiceName::new(input);

        assert!(matches!(result, Err(ConfigError::ReservedServiceName(_))));
    }

    #[rstest]
    #[case("fs/tools")]
    #[case("with space")]
    #[case("dot.name")]
    fn names_with_separators_are_rejected(#[case] input: &str) {
        let result = ServiceName::new(input);

        assert!(matches!(result, Err(ConfigError::InvalidServiceName(_))));
    }

    #[rstest]
    #[case("alpine", true)]
    #[case("alpine:3.20", true)]
    #[case("ghcr.io/example/mcp-filesystem:latest", true)]
    #[case("localhost:5000/tools/git", true)]
    #[case("library/ubuntu@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef", true)]
    #[case("", false)]
    #[case("Alpine", false)]
    #[case("alpine:", false)]
    #[case("with space:latest", false)]
    #[case("ghcr.io//double", false)]
    #[case("-leading/dash", false)]
    #[case("repo@sha256:nothex", false)]
    fn image_reference_shape(#[case] image: &str, #[case] valid: bool) {
        assert_eq!(is_valid_image_reference(image), valid);
    }

    #[rstest]
    #[case("per_session", ContainerStrategy::PerSession)]
    #[case("PerCall", ContainerStrategy::PerCall)]
    #[case("smart-refresh", ContainerStrategy::SmartRefresh)]
    fn strategy_spellings(#[case] input: &str, #[case] expected: ContainerStrategy) {
        assert_eq!(ContainerStrategy::try_from(input), Ok(expected));
    }

    #[test]
    fn zero_max_calls_is_rejected() {
        let name = ServiceName::new("git").expect("valid service name");
        let definition = ServiceDefinition::new(name, "alpine/git").expect("valid definition");

        let result = definition.with_max_calls_per_container(0);

        assert_eq!(result, Err(ConfigError::InvalidMaxCalls("git".to_owned())));
    }

    #[test]
    fn tool_names_may_not_contain_separator() {
        let name = ServiceName::new("git").expect("valid service name");
        let definition = ServiceDefinition::new(name, "alpine/git").expect("valid definition");

        let result = definition.with_tools([ToolDescriptor::new("log/all", "history")]);

        assert!(matches!(result, Err(ConfigError::InvalidToolName { .. })));
    }
}
