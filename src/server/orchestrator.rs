//! Request dispatch across sessions, containers and the proxy.

use super::catalog::{REGISTER_CLIENT_TOOL, initialize_result, tool_listing};
use super::error::{FabricError, FabricResult};
use crate::container::domain::ContainerInstance;
use crate::container::ports::ContainerRuntime;
use crate::container::services::{ContainerSupervisor, SupervisorSettings};
use crate::mount::MountSpec;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::proxy::ports::ProtocolProxy;
use crate::registry::{ContainerStrategy, ServiceDefinition, ServiceRegistry};
use crate::session::{ClientContext, ClientSession, SessionId, SessionRegistry};
use futures::future::join_all;
use mockable::Clock;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes client messages to the fabric's components.
///
/// One orchestrator serves every connection. Messages of one session are
/// expected to be handled in order by the caller.
pub struct Orchestrator<R, P, C>
where
    R: ContainerRuntime,
    P: ProtocolProxy,
    C: Clock + Send + Sync,
{
    registry: Arc<ServiceRegistry>,
    sessions: SessionRegistry<C>,
    supervisor: ContainerSupervisor<R, C>,
    proxy: Arc<P>,
}

impl<R, P, C> Orchestrator<R, P, C>
where
    R: ContainerRuntime,
    P: ProtocolProxy,
    C: Clock + Send + Sync,
{
    /// Wires the components for `registry`.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, runtime: Arc<R>, proxy: Arc<P>, clock: Arc<C>) -> Self {
        let settings = SupervisorSettings::from_orchestrator(registry.orchestrator());
        Self::with_supervisor_settings(registry, runtime, proxy, clock, settings)
    }

    /// Wires the components with explicit supervisor settings.
    #[must_use]
    pub fn with_supervisor_settings(
        registry: Arc<ServiceRegistry>,
        runtime: Arc<R>,
        proxy: Arc<P>,
        clock: Arc<C>,
        settings: SupervisorSettings,
    ) -> Self {
        let sessions = SessionRegistry::new(
            registry.orchestrator().allowed_mount_roots().clone(),
            Arc::clone(&clock),
        );
        let supervisor = ContainerSupervisor::new(runtime, clock, settings);
        Self {
            registry,
            sessions,
            supervisor,
            proxy,
        }
    }

    /// Returns the service registry.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Returns the session registry.
    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry<C> {
        &self.sessions
    }

    /// Returns the container supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ContainerSupervisor<R, C> {
        &self.supervisor
    }

    /// Opens a session for a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Internal`] when the session registry fails.
    pub fn open_session(&self, peer: Option<SocketAddr>) -> FabricResult<ClientSession> {
        Ok(self.sessions.register(peer)?)
    }

    /// Handles one decoded message and returns the response to send.
    ///
    /// Notifications are processed but produce no response.
    pub async fn handle_message(
        &self,
        session_id: SessionId,
        request: &JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        if let Err(err) = self.sessions.touch(session_id) {
            warn!(session = %session_id, error = %err, "activity on unknown session");
        }

        let outcome = self.dispatch(session_id, request).await;
        if request.is_notification() {
            if let Err(err) = outcome {
                debug!(session = %session_id, method = %request.method, error = %err, "notification failed");
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.response_id(), result),
            Err(err) => {
                if matches!(err, FabricError::Internal(_)) {
                    error!(session = %session_id, method = %request.method, error = %err, "request failed");
                } else {
                    debug!(session = %session_id, method = %request.method, error = %err, "request rejected");
                }
                JsonRpcResponse::failure(request.response_id(), err.to_rpc_error())
            }
        })
    }

    /// Ends a session and stops every container it owned.
    ///
    /// Returns the number of containers stopped.
    pub async fn close_session(&self, session_id: SessionId) -> usize {
        let owned = match self.sessions.remove(session_id) {
            Ok(instances) => instances,
            Err(err) => {
                error!(session = %session_id, error = %err, "failed to close session");
                return 0;
            }
        };
        join_all(owned.iter().map(|instance| self.supervisor.stop(instance))).await;
        info!(session = %session_id, stopped = owned.len(), "session ended");
        owned.len()
    }

    /// Stops containers idle for longer than the configured idle timeout.
    pub async fn sweep_idle(&self) -> Vec<ContainerInstance> {
        let idle_timeout = self.registry.orchestrator().idle_timeout();
        let swept = self.supervisor.sweep_idle(idle_timeout).await;
        for instance in &swept {
            self.release(instance);
        }
        swept
    }

    /// Stops every container still tracked.
    pub async fn shutdown(&self) -> Vec<ContainerInstance> {
        self.supervisor.shutdown().await
    }

    async fn dispatch(&self, session_id: SessionId, request: &JsonRpcRequest) -> FabricResult<Value> {
        match request.method.as_str() {
            "initialize" => Ok(initialize_result(&self.registry)),
            "tools/list" => Ok(json!({ "tools": tool_listing(&self.registry) })),
            "ping" => Ok(json!({})),
            "notifications/initialized" => Ok(Value::Null),
            "tools/call" => self.call_tool(session_id, request).await,
            other => Err(FabricError::MethodNotFound(other.to_owned())),
        }
    }

    async fn call_tool(&self, session_id: SessionId, request: &JsonRpcRequest) -> FabricResult<Value> {
        let name = request
            .param("name")
            .and_then(Value::as_str)
            .ok_or_else(|| FabricError::InvalidParams("tools/call requires a string name".to_owned()))?;
        let arguments = request
            .param("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        if name == REGISTER_CLIENT_TOOL {
            return self.register_client(session_id, &arguments);
        }

        let (service_name, tool) = name
            .split_once('/')
            .filter(|(service_part, tool_part)| !service_part.is_empty() && !tool_part.is_empty())
            .ok_or_else(|| {
                FabricError::InvalidParams(format!("tool name '{name}' must be <service>/<tool>"))
            })?;

        let context = self.sessions.context(session_id)?;
        let service = self
            .registry
            .get(service_name)
            .ok_or_else(|| FabricError::ServiceNotFound(service_name.to_owned()))?;
        self.call_service(service, &context, tool, arguments).await
    }

    fn register_client(&self, session_id: SessionId, arguments: &Value) -> FabricResult<Value> {
        let mounts: Vec<MountSpec> = match arguments.get("mounts") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|err| FabricError::InvalidParams(format!("invalid mounts: {err}")))?,
        };

        let context = self.sessions.attach_context(session_id, &mounts)?;
        Ok(json!({
            "sessionId": session_id.to_string(),
            "mounts": context.mounts(),
        }))
    }

    async fn call_service(
        &self,
        service: &ServiceDefinition,
        context: &ClientContext,
        tool: &str,
        arguments: Value,
    ) -> FabricResult<Value> {
        let session_id = context.session_id();
        let call_sequence = self.sessions.next_call_sequence(session_id)?;
        let instance = self.supervisor.resolve(service, context, call_sequence).await?;
        self.sessions.record_container(session_id, instance.clone())?;

        if let Err(err) = self.proxy.health_check(&instance).await {
            warn!(
                service = %service.name(),
                container = %instance.name(),
                error = %err,
                "container failed health check, stopping"
            );
            self.supervisor.stop(&instance).await;
            self.release(&instance);
            return Err(err.into());
        }

        let upstream = JsonRpcRequest::new(
            call_sequence,
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
        );
        let forwarded = self
            .proxy
            .forward(&instance, &upstream, service.timeout())
            .await;

        if let Some(updated) = self.supervisor.record_call(&instance).await {
            self.sessions.record_container(session_id, updated)?;
        }
        if service.strategy() == ContainerStrategy::PerCall {
            self.supervisor.stop(&instance).await;
            self.release(&instance);
        }

        let response = forwarded?;
        match response.error {
            Some(upstream_error) => Err(FabricError::Upstream(upstream_error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    fn release(&self, instance: &ContainerInstance) {
        if let Err(err) = self
            .sessions
            .forget_container(instance.session_id(), instance.key())
        {
            warn!(container = %instance.name(), error = %err, "failed to release container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::adapters::InMemoryContainerRuntime;
    use crate::protocol::{JsonRpcError, codes};
    use crate::proxy::adapters::InMemoryProtocolProxy;
    use crate::test_support::ManualClock;
    use chrono::TimeDelta;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    const CONFIG: &str = r#"
version: "1.0"
orchestrator:
  allowed_mount_roots: ["/home"]
  idle_timeout: 5m
mcp_services:
  git:
    image: alpine/git
  oneshot:
    image: example/oneshot
    container_strategy: per_call
  search:
    image: example/search
    container_strategy: smart_refresh
    max_calls_per_container: 2
"#;

    type TestOrchestrator = Orchestrator<InMemoryContainerRuntime, InMemoryProtocolProxy, ManualClock>;

    struct Harness {
        runtime: Arc<InMemoryContainerRuntime>,
        proxy: Arc<InMemoryProtocolProxy>,
        clock: Arc<ManualClock>,
        orchestrator: TestOrchestrator,
    }

    #[fixture]
    fn harness() -> Harness {
        let registry =
            Arc::new(ServiceRegistry::load_and_validate(CONFIG.as_bytes()).expect("valid config"));
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let proxy = Arc::new(InMemoryProtocolProxy::new());
        let clock = Arc::new(ManualClock::default());
        let orchestrator = Orchestrator::with_supervisor_settings(
            registry,
            Arc::clone(&runtime),
            Arc::clone(&proxy),
            Arc::clone(&clock),
            SupervisorSettings::default().with_poll_interval(Duration::from_millis(1)),
        );
        Harness {
            runtime,
            proxy,
            clock,
            orchestrator,
        }
    }

    fn call(id: u64, name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(id, "tools/call", Some(json!({"name": name, "arguments": arguments})))
    }

    async fn registered_session(harness: &Harness) -> SessionId {
        let session = harness.orchestrator.open_session(None).expect("open session");
        let response = harness
            .orchestrator
            .handle_message(
                session.id(),
                &call(
                    1,
                    REGISTER_CLIENT_TOOL,
                    json!({"mounts": [{"source": "/home/alice/proj", "target": "/workspace"}]}),
                ),
            )
            .await
            .expect("request gets a response");
        assert!(!response.is_error(), "registration failed: {response:?}");
        session.id()
    }

    fn error_code(response: Option<JsonRpcResponse>) -> Option<i64> {
        response.and_then(|reply| reply.error).map(|err| err.code)
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn tool_call_before_registration_is_rejected(harness: Harness) {
        let session = harness.orchestrator.open_session(None).expect("open session");

        let response = harness
            .orchestrator
            .handle_message(session.id(), &call(5, "git/status", json!({})))
            .await;

        assert_eq!(error_code(response), Some(codes::INTERNAL_ERROR));
        assert_eq!(harness.runtime.counters().expect("counters").created, 0);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn mount_outside_roots_is_rejected(harness: Harness) {
        let session = harness.orchestrator.open_session(None).expect("open session");

        let response = harness
            .orchestrator
            .handle_message(
                session.id(),
                &call(
                    1,
                    REGISTER_CLIENT_TOOL,
                    json!({"mounts": [{"source": "/home/../etc", "target": "/etc"}]}),
                ),
            )
            .await;

        assert_eq!(error_code(response), Some(codes::MOUNT_NOT_ALLOWED));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn per_session_calls_share_a_container(harness: Harness) {
        let session_id = registered_session(&harness).await;

        for id in 2..=4 {
            let response = harness
                .orchestrator
                .handle_message(session_id, &call(id, "git/status", json!({"path": "."})))
                .await
                .expect("request gets a response");
            assert_eq!(response.id, json!(id));
            assert!(response.result.is_some());
        }

        assert_eq!(harness.runtime.counters().expect("counters").created, 1);
        let forwarded = harness.proxy.forwarded().expect("forwarded calls");
        assert_eq!(forwarded.len(), 3);
        let params = forwarded.first().and_then(|call| call.request.params.clone());
        assert_eq!(params, Some(json!({"name": "status", "arguments": {"path": "."}})));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn per_call_containers_are_stopped_after_each_call(harness: Harness) {
        let session_id = registered_session(&harness).await;

        for id in 2..=3 {
            harness
                .orchestrator
                .handle_message(session_id, &call(id, "oneshot/run", json!({})))
                .await
                .expect("request gets a response");
        }

        let counters = harness.runtime.counters().expect("counters");
        assert_eq!(counters.created, 2);
        assert_eq!(counters.live, 0);
        let session = harness.orchestrator.sessions().get(session_id).expect("session");
        assert!(session.owned_containers().is_empty());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn smart_refresh_rotates_after_call_limit(harness: Harness) {
        let session_id = registered_session(&harness).await;

        for id in 2..=6 {
            harness
                .orchestrator
                .handle_message(session_id, &call(id, "search/query", json!({})))
                .await
                .expect("request gets a response");
        }

        let counters = harness.runtime.counters().expect("counters");
        assert_eq!(counters.created, 3);
        assert_eq!(counters.live, 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_service_is_reported(harness: Harness) {
        let session_id = registered_session(&harness).await;

        let response = harness
            .orchestrator
            .handle_message(session_id, &call(2, "nope/run", json!({})))
            .await;

        assert_eq!(error_code(response), Some(codes::SERVICE_NOT_FOUND));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_method_is_reported(harness: Harness) {
        let session = harness.orchestrator.open_session(None).expect("open session");

        let response = harness
            .orchestrator
            .handle_message(session.id(), &JsonRpcRequest::new(1, "resources/list", None))
            .await;

        assert_eq!(error_code(response), Some(codes::METHOD_NOT_FOUND));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn notifications_get_no_response(harness: Harness) {
        let session = harness.orchestrator.open_session(None).expect("open session");

        let response = harness
            .orchestrator
            .handle_message(
                session.id(),
                &JsonRpcRequest::notification("notifications/initialized", None),
            )
            .await;

        assert!(response.is_none());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn upstream_errors_and_timeouts_are_mapped(harness: Harness) {
        let session_id = registered_session(&harness).await;
        harness
            .proxy
            .set_error("git", JsonRpcError::new(-32_050, "bad ref"))
            .expect("script error");
        harness.proxy.fail_with_timeout("search").expect("script timeout");

        let upstream = harness
            .orchestrator
            .handle_message(session_id, &call(2, "git/log", json!({})))
            .await;
        let timed_out = harness
            .orchestrator
            .handle_message(session_id, &call(3, "search/query", json!({})))
            .await;

        assert_eq!(error_code(upstream), Some(-32_050));
        assert_eq!(error_code(timed_out), Some(codes::UPSTREAM_TIMEOUT));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn failed_health_check_stops_the_container(harness: Harness) {
        let session_id = registered_session(&harness).await;
        harness.proxy.set_unreachable("git").expect("script unreachable");

        let response = harness
            .orchestrator
            .handle_message(session_id, &call(2, "git/status", json!({})))
            .await;

        assert_eq!(error_code(response), Some(codes::CONTAINER_START_FAILURE));
        assert_eq!(harness.runtime.counters().expect("counters").live, 0);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn closing_a_session_stops_its_containers(harness: Harness) {
        let session_id = registered_session(&harness).await;
        harness
            .orchestrator
            .handle_message(session_id, &call(2, "git/status", json!({})))
            .await
            .expect("request gets a response");

        let stopped = harness.orchestrator.close_session(session_id).await;

        assert_eq!(stopped, 1);
        assert_eq!(harness.runtime.counters().expect("counters").live, 0);
        assert!(harness.orchestrator.supervisor().instances().await.is_empty());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn closing_a_session_with_two_containers_stops_both(harness: Harness) {
        let session_id = registered_session(&harness).await;
        for (id, tool) in [(2, "git/status"), (3, "search/query")] {
            let response = harness
                .orchestrator
                .handle_message(session_id, &call(id, tool, json!({})))
                .await;
            assert_eq!(error_code(response), None);
        }
        assert_eq!(harness.orchestrator.supervisor().instances().await.len(), 2);

        let stopped = harness.orchestrator.close_session(session_id).await;

        assert_eq!(stopped, 2);
        let counters = harness.runtime.counters().expect("counters");
        assert_eq!(counters.stopped, 2);
        assert_eq!(counters.live, 0);
        assert!(harness.orchestrator.supervisor().instances().await.is_empty());
        assert!(harness.orchestrator.sessions().get(session_id).is_err());
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn service_part_of_tool_name_is_case_insensitive(harness: Harness) {
        let session_id = registered_session(&harness).await;

        let response = harness
            .orchestrator
            .handle_message(session_id, &call(2, "Git/Status", json!({})))
            .await;

        assert_eq!(error_code(response), None);
        let forwarded = harness.proxy.forwarded().expect("forwarded calls");
        let params = forwarded.first().and_then(|call| call.request.params.clone());
        assert_eq!(params, Some(json!({"name": "Status", "arguments": {}})));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn idle_sweep_releases_session_ownership(harness: Harness) {
        let session_id = registered_session(&harness).await;
        harness
            .orchestrator
            .handle_message(session_id, &call(2, "git/status", json!({})))
            .await
            .expect("request gets a response");
        harness.clock.advance(TimeDelta::minutes(6));

        let swept = harness.orchestrator.sweep_idle().await;

        assert_eq!(swept.len(), 1);
        let session = harness.orchestrator.sessions().get(session_id).expect("session");
        assert!(session.owned_containers().is_empty());
    }
}
