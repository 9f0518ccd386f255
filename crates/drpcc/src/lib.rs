//! drpc client: subscribes to live streams and calls mutations on a drpc
//! server, mirroring each stream on a local graph.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Connection driver, request bookkeeping and subscription entry points.
pub mod client;
/// CLI parsing and TOML configuration.
pub mod config;
/// Error types for client operations.
pub mod error;
/// Local stream mirrors.
pub mod sink;
/// Owned subscription handles.
pub mod subscription;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
pub use sink::{MapSink, SetSink, Sink, SinkError, ValueSink};
pub use subscription::Subscription;

use drpc_common::transport::WebSocketTransport;
use drpc_common::LocalGraph;
use std::sync::Arc;
use tracing::info;

/// Opens a WebSocket to `url` and starts a client on it.
///
/// # Errors
///
/// Returns [`ClientError::Config`] for an invalid configuration and
/// [`ClientError::WebSocket`] if the connection cannot be established.
pub async fn connect(
    url: &str,
    graph: Arc<LocalGraph>,
    config: &ClientConfig,
) -> Result<Client, ClientError> {
    config.validate().map_err(ClientError::Config)?;
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    info!("connected to {}", url);
    let (transport, inbound) = WebSocketTransport::spawn(ws);
    Ok(Client::new(
        transport,
        inbound,
        graph,
        config.heartbeat_interval(),
    ))
}
