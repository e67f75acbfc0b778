//! Newline-delimited JSON-RPC over TCP.

use super::orchestrator::Orchestrator;
use crate::container::ports::ContainerRuntime;
use crate::protocol::{JsonRpcResponse, decode_request};
use crate::proxy::ports::ProtocolProxy;
use crate::session::SessionId;
use futures::{SinkExt, StreamExt};
use mockable::Clock;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest accepted message line in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

type Connection = Framed<TcpStream, LinesCodec>;

/// Accepts client connections and serves each on its own task.
pub struct FabricServer<R, P, C>
where
    R: ContainerRuntime + 'static,
    P: ProtocolProxy + 'static,
    C: Clock + Send + Sync + 'static,
{
    orchestrator: Arc<Orchestrator<R, P, C>>,
}

impl<R, P, C> FabricServer<R, P, C>
where
    R: ContainerRuntime + 'static,
    P: ProtocolProxy + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a server around `orchestrator`.
    #[must_use]
    pub const fn new(orchestrator: Arc<Orchestrator<R, P, C>>) -> Self {
        Self { orchestrator }
    }

    /// Serves `listener` until `shutdown` is cancelled.
    ///
    /// On cancellation the server stops accepting, lets open connections end
    /// their sessions for up to the configured grace period, aborts any that
    /// remain and finally stops every container still tracked.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the listener fails to accept.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let settings = self.orchestrator.registry().orchestrator();
        let grace = settings.shutdown_grace();
        let sweeper = tokio::spawn(run_idle_sweeper(
            Arc::clone(&self.orchestrator),
            settings.sweep_interval(),
            shutdown.child_token(),
        ));
        info!(address = ?listener.local_addr().ok(), "listening for clients");

        let mut connections = JoinSet::new();
        let accept_result = loop {
            while connections.try_join_next().is_some() {}

            let accepted = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                result = listener.accept() => result,
            };
            match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        Arc::clone(&self.orchestrator),
                        stream,
                        peer,
                        shutdown.child_token(),
                    ));
                }
                Err(err) if is_transient_accept_error(&err) => {
                    warn!(error = %err, "failed to accept connection");
                }
                Err(err) => {
                    shutdown.cancel();
                    break Err(err);
                }
            }
        };
        drop(listener);

        info!(open = connections.len(), "shutting down, draining connections");
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), ?grace, "grace period elapsed, aborting connections");
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        if let Err(err) = sweeper.await {
            warn!(error = %err, "idle sweeper ended abnormally");
        }
        let stopped = self.orchestrator.shutdown().await;
        info!(stopped = stopped.len(), "server stopped");
        accept_result
    }
}

async fn serve_connection<R, P, C>(
    orchestrator: Arc<Orchestrator<R, P, C>>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) where
    R: ContainerRuntime,
    P: ProtocolProxy,
    C: Clock + Send + Sync,
{
    let session_id = match orchestrator.open_session(Some(peer)) {
        Ok(session) => session.id(),
        Err(err) => {
            warn!(%peer, error = %err, "failed to open session");
            return;
        }
    };
    info!(%peer, session = %session_id, "client connected");

    let mut connection = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    read_messages(&orchestrator, session_id, &mut connection, &shutdown).await;

    orchestrator.close_session(session_id).await;
    info!(%peer, session = %session_id, "client disconnected");
}

async fn read_messages<R, P, C>(
    orchestrator: &Orchestrator<R, P, C>,
    session_id: SessionId,
    connection: &mut Connection,
    shutdown: &CancellationToken,
) where
    R: ContainerRuntime,
    P: ProtocolProxy,
    C: Clock + Send + Sync,
{
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return,
            frame = connection.next() => frame,
        };
        let line = match next {
            None => return,
            Some(Ok(text)) => text,
            Some(Err(err)) => {
                warn!(session = %session_id, error = %err, "connection read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_request(&line) {
            Ok(request) => {
                let Some(response) = orchestrator.handle_message(session_id, &request).await else {
                    continue;
                };
                if !send(connection, session_id, &response).await {
                    return;
                }
            }
            Err(err) => {
                debug!(session = %session_id, error = %err, "undecodable message, closing");
                let response = JsonRpcResponse::failure(Value::Null, err.to_rpc_error());
                send(connection, session_id, &response).await;
                return;
            }
        }
    }
}

/// Writes one response line, returning `false` when the connection is gone.
async fn send(connection: &mut Connection, session_id: SessionId, response: &JsonRpcResponse) -> bool {
    let line = match serde_json::to_string(response) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(session = %session_id, error = %err, "failed to encode response");
            return true;
        }
    };
    match connection.send(line).await {
        Ok(()) => true,
        Err(err) => {
            warn!(session = %session_id, error = %err, "connection write failed");
            false
        }
    }
}

async fn run_idle_sweeper<R, P, C>(
    orchestrator: Arc<Orchestrator<R, P, C>>,
    interval: Duration,
    shutdown: CancellationToken,
) where
    R: ContainerRuntime,
    P: ProtocolProxy,
    C: Clock + Send + Sync,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let swept = orchestrator.sweep_idle().await;
        if !swept.is_empty() {
            info!(stopped = swept.len(), "idle sweep stopped containers");
        }
    }
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
