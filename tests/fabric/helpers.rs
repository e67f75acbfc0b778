//! Shared fixtures for in-memory fabric integration tests.

use futures::{SinkExt, StreamExt};
use mockable::DefaultClock;
use reactor_fabric::container::adapters::InMemoryContainerRuntime;
use reactor_fabric::container::services::SupervisorSettings;
use reactor_fabric::protocol::{JsonRpcRequest, JsonRpcResponse};
use reactor_fabric::proxy::adapters::InMemoryProtocolProxy;
use reactor_fabric::registry::ServiceRegistry;
use reactor_fabric::server::{FabricServer, Orchestrator};
use rstest::fixture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Configuration shared by the integration tests.
pub const CONFIG: &str = r#"
version: "1.0"
orchestrator:
  allowed_mount_roots: ["/home/"]
  idle_timeout: 10m
  shutdown_grace: 2s
mcp_services:
  git:
    image: alpine/git
    tools:
      - name: status
        description: Show the working tree status
  sandbox:
    image: example/sandbox
    container_strategy: per_call
"#;

/// Orchestrator type wired with in-memory adapters.
pub type TestOrchestrator =
    Orchestrator<InMemoryContainerRuntime, InMemoryProtocolProxy, DefaultClock>;

/// In-memory adapters and the orchestrator built on them.
pub struct Fabric {
    /// Container runtime double.
    pub runtime: Arc<InMemoryContainerRuntime>,
    /// Upstream proxy double.
    pub proxy: Arc<InMemoryProtocolProxy>,
    /// Orchestrator under test.
    pub orchestrator: Arc<TestOrchestrator>,
}

/// Provides a fabric over the shared configuration.
#[fixture]
pub fn fabric() -> Fabric {
    let registry =
        ServiceRegistry::load_and_validate(CONFIG.as_bytes()).expect("test config should load");
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    let proxy = Arc::new(InMemoryProtocolProxy::new());
    let orchestrator = Arc::new(Orchestrator::with_supervisor_settings(
        Arc::new(registry),
        Arc::clone(&runtime),
        Arc::clone(&proxy),
        Arc::new(DefaultClock),
        SupervisorSettings::default().with_poll_interval(Duration::from_millis(1)),
    ));
    Fabric {
        runtime,
        proxy,
        orchestrator,
    }
}

/// A server running on an ephemeral port.
pub struct RunningServer {
    /// Bound address.
    pub address: SocketAddr,
    /// Cancels the server.
    pub shutdown: CancellationToken,
    /// Resolves when `serve` returns.
    pub handle: JoinHandle<io::Result<()>>,
}

/// Starts a server for `orchestrator` on `127.0.0.1:0`.
///
/// # Errors
///
/// Returns an I/O error when the listener cannot be bound.
pub async fn start_server(orchestrator: Arc<TestOrchestrator>) -> io::Result<RunningServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(FabricServer::new(orchestrator).serve(listener, shutdown.clone()));
    Ok(RunningServer {
        address,
        shutdown,
        handle,
    })
}

/// A line-framed client connection.
pub struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    /// Connects to `address`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the connection fails.
    pub async fn connect(address: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }

    /// Sends a raw line.
    pub async fn send_line(&mut self, line: &str) {
        self.framed
            .send(line.to_owned())
            .await
            .expect("line should be sent");
    }

    /// Sends `request` and waits for its response.
    pub async fn call(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let line = serde_json::to_string(request).expect("request should encode");
        self.send_line(&line).await;
        self.receive()
            .await
            .expect("server should answer before closing")
    }

    /// Waits for the next response, returning `None` once the server closes.
    pub async fn receive(&mut self) -> Option<JsonRpcResponse> {
        let next = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("server should answer in time")?;
        let line = next.expect("line should decode");
        Some(serde_json::from_str(&line).expect("response should be JSON-RPC"))
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
