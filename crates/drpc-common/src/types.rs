//! Core type aliases and protocol constants for drpc.

use std::time::Duration;

/// Client-chosen request identifier, unique among that client's outstanding
/// subscriptions and calls. The server only ever echoes ids it received.
pub type RequestId = i64;

/// Opaque object payload carried by `subscribe`, `call` and `presence`.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// Default HTTP path on which the server accepts WebSocket upgrades.
pub const DEFAULT_PATH: &str = "/api/ws";

/// Connection defaults shared by server and client.
pub mod defaults {
    use super::Duration;

    /// Idle time after the last outbound message before a heartbeat is sent.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
    /// Time without any inbound message after which the server closes.
    pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
    /// Maximum inbound messages per rate-limit window.
    pub const RATE_LIMIT_MAX: u32 = 100;
    /// Length of the sliding rate-limit window.
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(300);
    /// Send-buffer ceiling; a transport reporting more than this is closed.
    pub const MAX_BUFFERED_BYTES: usize = 100 * 1024;
    /// Maximum size of a single inbound WebSocket message.
    pub const MAX_PAYLOAD: usize = 100 * 1024;
}
