//! Configuration error type.

use crate::mount::MountError;
use thiserror::Error;

/// Errors that make a configuration unusable.
///
/// Any of these is fatal at start-up: the orchestrator never serves traffic
/// with an invalid configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file '{path}': {message}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error message.
        message: String,
    },

    /// The document is not valid YAML or does not match the expected shape.
    #[error("malformed configuration: {0}")]
    Malformed(String),

    /// The `version` key is absent.
    #[error("configuration version is required")]
    MissingVersion,

    /// The `version` key names an unsupported format.
    #[error("unsupported configuration version '{0}'")]
    UnsupportedVersion(String),

    /// The mount allow-list is invalid.
    #[error("invalid orchestrator.allowed_mount_roots: {0}")]
    MountRoots(#[from] MountError),

    /// The listen address does not parse as a socket address.
    #[error("invalid orchestrator.listen_address '{0}'")]
    InvalidListenAddress(String),

    /// No services are configured.
    #[error("at least one MCP service must be defined")]
    NoServices,

    /// A service name is empty.
    #[error("MCP service name must not be empty")]
    EmptyServiceName,

    /// A service name contains characters outside `[a-z0-9_-]`.
    #[error(
        "MCP service name '{0}' contains invalid characters (only lowercase alphanumeric, '-' and '_' allowed)"
    )]
    InvalidServiceName(String),

    /// A service uses a name reserved for the orchestrator itself.
    #[error("MCP service name '{0}' is reserved")]
    ReservedServiceName(String),

    /// Two service keys normalise to the same name.
    #[error("MCP service '{0}' is defined more than once")]
    DuplicateService(String),

    /// A service image is missing or not a valid image reference.
    #[error("MCP service '{service}' has invalid image '{image}'")]
    InvalidImage {
        /// Service name.
        service: String,
        /// Image reference as configured.
        image: String,
    },

    /// A container strategy is not recognised.
    #[error("MCP service '{service}' has unknown container_strategy '{value}'")]
    InvalidStrategy {
        /// Service name.
        service: String,
        /// Configured strategy.
        value: String,
    },

    /// A duration field does not parse.
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        /// Dotted field path.
        field: String,
        /// Configured value.
        value: String,
    },

    /// A memory threshold does not parse.
    #[error("MCP service '{service}' has invalid memory_threshold '{value}'")]
    InvalidMemoryThreshold {
        /// Service name.
        service: String,
        /// Configured value.
        value: String,
    },

    /// `max_calls_per_container` is zero.
    #[error("MCP service '{0}' must set max_calls_per_container greater than zero")]
    InvalidMaxCalls(String),

    /// The container port is zero.
    #[error("MCP service '{0}' must set a non-zero port")]
    InvalidPort(String),

    /// A `config` entry is not a scalar.
    #[error("MCP service '{service}' config key '{key}' must be a scalar value")]
    InvalidConfigValue {
        /// Service name.
        service: String,
        /// Offending key.
        key: String,
    },

    /// A tool descriptor has an empty name or contains `/`.
    #[error("MCP service '{service}' declares invalid tool name '{tool}'")]
    InvalidToolName {
        /// Service name.
        service: String,
        /// Offending tool name.
        tool: String,
    },
}
