//! In-memory proxy for tests.

use crate::container::domain::ContainerInstance;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::proxy::ports::{ProtocolProxy, ProxyError, ProxyResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A request observed by [`InMemoryProtocolProxy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedCall {
    /// Container the request was addressed to.
    pub container_id: String,
    /// Service name of the container.
    pub service: String,
    /// The forwarded request.
    pub request: JsonRpcRequest,
}

/// Proxy whose upstream behaviour is scripted per service.
///
/// Unscripted services echo the forwarded arguments back as a text content
/// block.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProtocolProxy {
    state: Arc<RwLock<InMemoryProxyState>>,
}

#[derive(Debug, Default)]
struct InMemoryProxyState {
    results: HashMap<String, Value>,
    errors: HashMap<String, JsonRpcError>,
    timeouts: HashSet<String>,
    unreachable: HashSet<String>,
    forwarded: Vec<ForwardedCall>,
}

impl InMemoryProtocolProxy {
    /// Creates a proxy with no scripted behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every call to `service` with `result`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when lock acquisition fails.
    pub fn set_result(&self, service: impl Into<String>, result: Value) -> ProxyResult<()> {
        self.write_state()?.results.insert(service.into(), result);
        Ok(())
    }

    /// Answers every call to `service` with the JSON-RPC `error`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when lock acquisition fails.
    pub fn set_error(&self, service: impl Into<String>, error: JsonRpcError) -> ProxyResult<()> {
        self.write_state()?.errors.insert(service.into(), error);
        Ok(())
    }

    /// Makes every call to `service` time out.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when lock acquisition fails.
    pub fn fail_with_timeout(&self, service: impl Into<String>) -> ProxyResult<()> {
        self.write_state()?.timeouts.insert(service.into());
        Ok(())
    }

    /// Makes health checks against `service` fail.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when lock acquisition fails.
    pub fn set_unreachable(&self, service: impl Into<String>) -> ProxyResult<()> {
        self.write_state()?.unreachable.insert(service.into());
        Ok(())
    }

    /// Returns every forwarded request in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when lock acquisition fails.
    pub fn forwarded(&self) -> ProxyResult<Vec<ForwardedCall>> {
        Ok(self.read_state()?.forwarded.clone())
    }

    fn read_state(&self) -> ProxyResult<std::sync::RwLockReadGuard<'_, InMemoryProxyState>> {
        self.state.read().map_err(|err| lock_error(&err))
    }

    fn write_state(&self) -> ProxyResult<std::sync::RwLockWriteGuard<'_, InMemoryProxyState>> {
        self.state.write().map_err(|err| lock_error(&err))
    }
}

fn lock_error(err: &impl ToString) -> ProxyError {
    ProxyError::Transport {
        endpoint: "in-memory".to_owned(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ProtocolProxy for InMemoryProtocolProxy {
    async fn forward(
        &self,
        instance: &ContainerInstance,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> ProxyResult<JsonRpcResponse> {
        let service = instance.service().as_str().to_owned();
        let mut state = self.write_state()?;
        state.forwarded.push(ForwardedCall {
            container_id: instance.id().to_owned(),
            service: service.clone(),
            request: request.clone(),
        });

        if state.timeouts.contains(&service) {
            return Err(ProxyError::UpstreamTimeout(timeout));
        }
        if let Some(error) = state.errors.get(&service) {
            return Ok(JsonRpcResponse::failure(request.response_id(), error.clone()));
        }

        let result = state.results.get(&service).cloned().unwrap_or_else(|| {
            let arguments = request.param("arguments").cloned().unwrap_or(Value::Null);
            json!({
                "content": [{"type": "text", "text": arguments.to_string()}],
                "isError": false,
            })
        });
        Ok(JsonRpcResponse::success(request.response_id(), result))
    }

    async fn health_check(&self, instance: &ContainerInstance) -> ProxyResult<()> {
        let service = instance.service().as_str();
        if self.read_state()?.unreachable.contains(service) {
            return Err(ProxyError::Unreachable {
                endpoint: instance.endpoint().to_string(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(())
    }
}
