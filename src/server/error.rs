//! Per-request error taxonomy and its JSON-RPC mapping.

use crate::container::services::SupervisorError;
use crate::mount::MountError;
use crate::protocol::{JsonRpcError, codes};
use crate::proxy::ports::ProxyError;
use crate::session::SessionError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Message returned to clients for internal failures.
const INTERNAL_MESSAGE: &str = "internal error";

/// Failures of a single request.
///
/// None of these close the connection.
#[derive(Debug, Clone, Error)]
pub enum FabricError {
    /// The method is not served.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The request parameters are malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A requested mount was rejected.
    #[error(transparent)]
    MountNotAllowed(#[from] MountError),

    /// No service with the name is configured.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The backing container could not be started or is not reachable.
    #[error("container start failure: {0}")]
    ContainerStartFailure(String),

    /// Forwarding to the container failed.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// The container did not answer in time.
    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// The container answered with a JSON-RPC error.
    #[error("upstream error {}: {}", .0.code, .0.message)]
    Upstream(JsonRpcError),

    /// A tool call arrived before `fabric/registerClient`.
    #[error("not registered")]
    NotRegistered,

    /// An invariant was violated inside the server.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for request handling.
pub type FabricResult<T> = Result<T, FabricError>;

impl FabricError {
    /// Returns the JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::MountNotAllowed(_) => codes::MOUNT_NOT_ALLOWED,
            Self::ServiceNotFound(_) => codes::SERVICE_NOT_FOUND,
            Self::ContainerStartFailure(_) => codes::CONTAINER_START_FAILURE,
            Self::Proxy(_) => codes::PROXY_ERROR,
            Self::UpstreamTimeout(_) => codes::UPSTREAM_TIMEOUT,
            Self::Upstream(error) => error.code,
            Self::NotRegistered | Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Returns the taxonomy name carried in `error.data.kind`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MethodNotFound(_) => "MethodNotFound",
            Self::InvalidParams(_) => "InvalidParams",
            Self::MountNotAllowed(_) => "MountNotAllowed",
            Self::ServiceNotFound(_) => "ServiceNotFound",
            Self::ContainerStartFailure(_) => "ContainerStartFailure",
            Self::Proxy(_) => "ProxyError",
            Self::UpstreamTimeout(_) => "UpstreamTimeout",
            Self::Upstream(_) => "Upstream",
            Self::NotRegistered | Self::Internal(_) => "InternalError",
        }
    }

    /// Renders the error for the wire.
    ///
    /// Upstream errors pass through unchanged and internal details are
    /// replaced with a generic message.
    #[must_use]
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let message = match self {
            Self::Upstream(error) => return error.clone(),
            Self::Internal(_) => INTERNAL_MESSAGE.to_owned(),
            other => other.to_string(),
        };
        JsonRpcError::new(self.code(), message).with_data(json!({ "kind": self.kind() }))
    }
}

impl From<SessionError> for FabricError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Mount(mount) => Self::MountNotAllowed(mount),
            SessionError::NotRegistered(_) => Self::NotRegistered,
            other @ (SessionError::NotFound(_) | SessionError::Lock(_)) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<SupervisorError> for FabricError {
    fn from(error: SupervisorError) -> Self {
        Self::ContainerStartFailure(error.to_string())
    }
}

impl From<ProxyError> for FabricError {
    fn from(error: ProxyError) -> Self {
        match error {
            ProxyError::UpstreamTimeout(timeout) => Self::UpstreamTimeout(timeout),
            ProxyError::Unreachable { .. } => Self::ContainerStartFailure(error.to_string()),
            ProxyError::Transport { .. } | ProxyError::InvalidResponse(_) => {
                Self::Proxy(error.to_string())
            }
        }
    }
}
