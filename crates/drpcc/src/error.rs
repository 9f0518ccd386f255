use crate::sink::SinkError;
use drpc_common::{ProtocolError, TransportError};
use thiserror::Error;

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Opening the WebSocket failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The transport refused a send.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection closed before the response arrived.
    #[error("connection closed")]
    Disconnected,

    /// The snapshot could not be mirrored locally.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}
