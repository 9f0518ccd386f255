use thiserror::Error;

/// Errors that can occur while serving connections.
#[derive(Error, Debug)]
pub enum ServerError {
    /// WebSocket handshake or transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The per-connection context factory failed.
    #[error("context creation failed: {0}")]
    Context(#[source] anyhow::Error),
    /// The server configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}
