use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::endpoint::Endpoints;
use crate::error::ServerError;
use crate::metrics::counters;
use crate::presence::PresenceHandler;
use crate::registry::ConnectionRegistry;
use drpc_common::transport::WebSocketTransport;
use drpc_common::{Inbound, Transport};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, warn};

/// What the server knows about a connection before it is served.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// Remote socket address, if the transport has one.
    pub peer: Option<SocketAddr>,
    /// Request path of the upgrade.
    pub path: String,
    /// Raw query string of the upgrade, if any.
    pub query: Option<String>,
    /// Upgrade request headers.
    pub headers: HeaderMap,
}

type ContextFactory<C> =
    Box<dyn Fn(ConnectionInfo) -> BoxFuture<'static, anyhow::Result<C>> + Send + Sync>;

/// A reactive RPC server: endpoints, per-connection context creation and
/// the registry of open connections.
pub struct RpcServer<C> {
    config: Arc<ServerConfig>,
    endpoints: Arc<Endpoints<C>>,
    presence: Option<Arc<dyn PresenceHandler>>,
    context: ContextFactory<C>,
    registry: Arc<ConnectionRegistry<C>>,
    /// Accepted sockets still being served, including handshakes.
    active_connections: AtomicUsize,
}

impl RpcServer<()> {
    /// Creates a server whose endpoints receive a unit context.
    #[must_use]
    pub fn without_context(config: ServerConfig, endpoints: Endpoints<()>) -> Self {
        Self::new(config, endpoints, |_info| async { Ok(()) })
    }
}

impl<C: Send + Sync + 'static> RpcServer<C> {
    /// Creates a server.
    ///
    /// `context` runs once per connection before any message is dispatched;
    /// messages received meanwhile are queued and handled in order once it
    /// resolves. A failed context closes the connection.
    pub fn new<F, Fut>(config: ServerConfig, endpoints: Endpoints<C>, context: F) -> Self
    where
        F: Fn(ConnectionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<C>> + Send + 'static,
    {
        Self {
            config: Arc::new(config),
            endpoints: Arc::new(endpoints),
            presence: None,
            context: Box::new(move |info| Box::pin(context(info)) as BoxFuture<'static, _>),
            registry: Arc::new(ConnectionRegistry::new()),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Attaches a presence handler. Without one, `presence` messages close
    /// the connection.
    #[must_use]
    pub fn with_presence(mut self, presence: Arc<dyn PresenceHandler>) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registry of open connections.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Sends the coalesced changes of the last computation step to every
    /// open connection. Call after each step of the graph.
    pub fn broadcast_step(&self) {
        self.registry.broadcast_step();
    }

    /// Serves one already-established transport until it closes.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Context`] if the context factory fails; the
    /// transport is closed in that case.
    pub async fn serve_transport(
        &self,
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        info: ConnectionInfo,
    ) -> Result<(), ServerError> {
        let peer = info.peer;
        let context = match (self.context)(info).await {
            Ok(context) => Arc::new(context),
            Err(e) => {
                debug!(peer = ?peer, error = %e, "context creation failed");
                counters::connections_rejected_total("context");
                transport.close();
                return Err(ServerError::Context(e));
            }
        };

        let conn = Arc::new(Connection::new(
            self.registry.next_id(),
            transport,
            self.config.clone(),
            self.endpoints.clone(),
            self.presence.clone(),
            context,
            Arc::downgrade(&self.registry),
        ));
        self.registry.insert(conn.clone());
        debug!(conn_id = conn.id(), peer = ?peer, "connection opened");

        conn.run(inbound).await;
        Ok(())
    }

    /// Performs the WebSocket upgrade on `stream` and serves it.
    ///
    /// Upgrades on any path other than the configured one are refused
    /// with HTTP 404.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake or context creation fails.
    pub async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_payload),
            max_frame_size: Some(self.config.max_payload),
            ..WebSocketConfig::default()
        };

        let info_cell = Arc::new(OnceLock::new());
        let cell = info_cell.clone();
        let expected_path = self.config.path.clone();
        let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            move |req: &Request, resp: Response| {
                if req.uri().path() != expected_path {
                    let mut refused = ErrorResponse::new(None);
                    *refused.status_mut() = StatusCode::NOT_FOUND;
                    return Err(refused);
                }
                let _ = cell.set(ConnectionInfo {
                    peer: Some(peer_addr),
                    path: req.uri().path().to_string(),
                    query: req.uri().query().map(str::to_string),
                    headers: req.headers().clone(),
                });
                Ok(resp)
            },
            Some(ws_config),
        )
        .await?;

        let info = info_cell.get().cloned().unwrap_or_else(|| ConnectionInfo {
            peer: Some(peer_addr),
            ..ConnectionInfo::default()
        });
        let (transport, inbound) = WebSocketTransport::spawn(ws_stream);
        self.serve_transport(transport, inbound, info).await
    }
}

/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run<C: Send + Sync + 'static>(
    listener: TcpListener,
    server: Arc<RpcServer<C>>,
) -> Result<(), ServerError> {
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, server, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// When a value is sent on the shutdown channel, or its sender is dropped,
/// the accept loop stops accepting, closes the open connections and waits
/// for their tasks to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown<C: Send + Sync + 'static>(
    listener: TcpListener,
    server: Arc<RpcServer<C>>,
    mut shutdown_rx: tokio::sync::watch::Receiver<()>,
) -> Result<(), ServerError> {
    let local_addr = listener.local_addr().map_err(ServerError::Io)?;
    info!("server listening on {}", local_addr);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if server.active_connections.load(Ordering::Relaxed) >= server.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            counters::connections_rejected_total("max_conns");
                            drop(stream);
                            continue;
                        }
                        server.active_connections.fetch_add(1, Ordering::Relaxed);
                        let server = Arc::clone(&server);
                        tasks.spawn(async move {
                            if let Err(e) = server.handle_connection(stream, addr).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                            server.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", tasks.len());
                break;
            }
        }
    }

    server.registry.close_all();

    // Wait for in-flight connections to finish (with timeout)
    let drain_timeout = std::time::Duration::from_secs(30);
    let drained = tokio::time::timeout(drain_timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            tasks.len()
        );
        tasks.abort_all();
    }

    info!("server shut down gracefully");
    Ok(())
}
