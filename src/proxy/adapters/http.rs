//! HTTP proxy built on `reqwest`.

use crate::container::domain::ContainerInstance;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::proxy::ports::{ProtocolProxy, ProxyError, ProxyResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const RPC_PATH: &str = "/";

/// Forwards requests as `POST /` with a JSON-RPC body.
#[derive(Debug, Clone)]
pub struct HttpProtocolProxy {
    client: reqwest::Client,
    health_timeout: Duration,
}

impl Default for HttpProtocolProxy {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpProtocolProxy {
    /// Wraps an HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Sets the bound on the TCP probe used by health checks.
    #[must_use]
    pub const fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}

#[async_trait]
impl ProtocolProxy for HttpProtocolProxy {
    async fn forward(
        &self,
        instance: &ContainerInstance,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> ProxyResult<JsonRpcResponse> {
        let endpoint = instance.endpoint().to_string();
        let url = instance.endpoint().http_url(RPC_PATH);
        debug!(url = %url, method = %request.method, "forwarding request");

        let transport_error = |error: reqwest::Error| {
            if error.is_timeout() {
                ProxyError::UpstreamTimeout(timeout)
            } else {
                ProxyError::Transport {
                    endpoint: endpoint.clone(),
                    reason: error.to_string(),
                }
            }
        };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => interpret_payload(request, payload),
            Err(_) if !status.is_success() => Err(ProxyError::Transport {
                endpoint,
                reason: format!("upstream answered with HTTP {status}"),
            }),
            Err(error) => Err(ProxyError::InvalidResponse(error.to_string())),
        }
    }

    async fn health_check(&self, instance: &ContainerInstance) -> ProxyResult<()> {
        let endpoint = instance.endpoint();
        let unreachable = |reason: String| ProxyError::Unreachable {
            endpoint: endpoint.to_string(),
            reason,
        };

        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        tokio::time::timeout(self.health_timeout, connect)
            .await
            .map_err(|_| unreachable(format!("no connection within {:?}", self.health_timeout)))?
            .map_err(|error| unreachable(error.to_string()))?;
        Ok(())
    }
}

/// Turns an upstream JSON body into a response for `request`.
///
/// A missing `result` is read as `null`; an `error` member is passed through.
fn interpret_payload(request: &JsonRpcRequest, payload: Value) -> ProxyResult<JsonRpcResponse> {
    let Value::Object(mut members) = payload else {
        return Err(ProxyError::InvalidResponse(
            "upstream body is not a JSON object".to_owned(),
        ));
    };

    if let Some(raw_error) = members.remove("error").filter(|value| !value.is_null()) {
        let error: JsonRpcError = serde_json::from_value(raw_error)
            .map_err(|err| ProxyError::InvalidResponse(err.to_string()))?;
        return Ok(JsonRpcResponse::failure(request.response_id(), error));
    }

    let result = members.remove("result").unwrap_or(Value::Null);
    Ok(JsonRpcResponse::success(request.response_id(), result))
}
