//! drpc server: per-connection protocol handling for reactive streams and
//! mutations over WebSocket or in-process transports.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
/// Per-connection protocol state machine.
pub mod connection;
/// Stream and mutation endpoint lookup table.
pub mod endpoint;
/// Error types for server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Presence collaborator interface and an in-memory implementation.
pub mod presence;
mod ratelimit;
/// Connection-id keyed table of open connections.
pub mod registry;
/// Accept loop, WebSocket upgrade and connection setup.
pub mod server;
/// Stream handles over reactive graph values.
pub mod source;

pub use connection::CloseReason;
pub use endpoint::{Endpoints, StreamHandle};
pub use presence::{PresenceHandler, PresenceSet};
pub use server::{run, run_with_shutdown, ConnectionInfo, RpcServer};
