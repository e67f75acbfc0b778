//! Upstream forwarding port.

use crate::container::domain::ContainerInstance;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors raised while talking to a service container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The request could not be delivered or the reply could not be read.
    #[error("transport error talking to {endpoint}: {reason}")]
    Transport {
        /// Container endpoint.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// The service did not answer within the configured timeout.
    #[error("upstream did not answer within {0:?}")]
    UpstreamTimeout(Duration),

    /// The reply was not a JSON-RPC response.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The container endpoint refused or did not accept a connection.
    #[error("endpoint {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// Container endpoint.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Delivers JSON-RPC requests to the service inside a container.
#[async_trait]
pub trait ProtocolProxy: Send + Sync {
    /// Sends `request` to `instance` and waits at most `timeout` for the reply.
    ///
    /// The returned response carries either the upstream result or the
    /// upstream error object unchanged.
    async fn forward(
        &self,
        instance: &ContainerInstance,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> ProxyResult<JsonRpcResponse>;

    /// Checks that the container endpoint accepts connections.
    async fn health_check(&self, instance: &ContainerInstance) -> ProxyResult<()>;
}
