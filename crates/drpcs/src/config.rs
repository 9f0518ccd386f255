use clap::Parser;
use drpc_common::types::{defaults, DEFAULT_PATH};
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the demo server.
#[derive(Parser, Debug, Clone)]
#[command(name = "drpcs")]
#[command(about = "drpc reactive RPC server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "DRPCS_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "DRPCS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// HTTP path accepting WebSocket upgrades.
    #[arg(long, default_value = DEFAULT_PATH, env = "DRPCS_PATH")]
    pub path: String,
    /// Seconds of server send-idle time before a heartbeat is sent.
    #[arg(long, default_value = "10", env = "DRPCS_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: u64,
    /// Seconds without an inbound message before the connection closes.
    #[arg(long, default_value = "30", env = "DRPCS_INACTIVITY_TIMEOUT")]
    pub inactivity_timeout: u64,
    /// Maximum inbound messages per rate window.
    #[arg(long, default_value = "100", env = "DRPCS_RATE_LIMIT")]
    pub rate_limit: u32,
    /// Rate window length in seconds.
    #[arg(long, default_value = "300", env = "DRPCS_RATE_WINDOW")]
    pub rate_window: u64,
    /// Send-buffer ceiling in bytes.
    #[arg(long, default_value = "102400", env = "DRPCS_MAX_BUFFERED")]
    pub max_buffered: usize,
    /// Maximum WebSocket payload size in bytes.
    #[arg(long, default_value = "102400", env = "DRPCS_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "DRPCS_MAX_CONNS")]
    pub max_conns: usize,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// HTTP path accepting WebSocket upgrades.
    pub path: String,
    /// Seconds of server send-idle time before a heartbeat is sent.
    pub heartbeat_interval: u64,
    /// Seconds without an inbound message before the connection closes.
    pub inactivity_timeout: u64,
    /// Maximum inbound messages per rate window.
    pub rate_limit: u32,
    /// Rate window length in seconds.
    pub rate_window: u64,
    /// Send-buffer ceiling in bytes.
    pub max_buffered: usize,
    /// Maximum WebSocket payload size in bytes.
    pub max_payload: usize,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            path: DEFAULT_PATH.to_string(),
            heartbeat_interval: defaults::HEARTBEAT_INTERVAL.as_secs(),
            inactivity_timeout: defaults::INACTIVITY_TIMEOUT.as_secs(),
            rate_limit: defaults::RATE_LIMIT_MAX,
            rate_window: defaults::RATE_LIMIT_WINDOW.as_secs(),
            max_buffered: defaults::MAX_BUFFERED_BYTES,
            max_payload: defaults::MAX_PAYLOAD,
            max_conns: 10_000,
        }
    }
}

impl ServerConfig {
    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Inactivity timeout as a [`Duration`].
    #[must_use]
    pub const fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout)
    }

    /// Rate window as a [`Duration`].
    #[must_use]
    pub const fn rate_period(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err("path must start with '/'".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.rate_limit == 0 {
            return Err("rate_limit must be greater than 0".to_string());
        }
        if self.rate_window == 0 {
            return Err("rate_window must be greater than 0".to_string());
        }
        if self.rate_window > 86_400 {
            return Err("rate_window exceeds reasonable limit (86400 seconds)".to_string());
        }

        if self.max_buffered == 0 {
            return Err("max_buffered must be greater than 0".to_string());
        }

        const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_PAYLOAD
            ));
        }

        if self.heartbeat_interval == 0 {
            return Err("heartbeat_interval must be greater than 0".to_string());
        }
        if self.inactivity_timeout == 0 {
            return Err("inactivity_timeout must be greater than 0".to_string());
        }
        if self.inactivity_timeout > 86_400 {
            return Err(
                "inactivity_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }
        if self.heartbeat_interval >= self.inactivity_timeout {
            return Err("heartbeat_interval must be shorter than inactivity_timeout".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            path: args.path,
            heartbeat_interval: args.heartbeat_interval,
            inactivity_timeout: args.inactivity_timeout,
            rate_limit: args.rate_limit,
            rate_window: args.rate_window,
            max_buffered: args.max_buffered,
            max_payload: args.max_payload,
            max_conns: args.max_conns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig::default()
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn defaults_match_protocol() {
        let c = valid_config();
        assert_eq!(c.path, "/api/ws");
        assert_eq!(c.heartbeat(), Duration::from_secs(10));
        assert_eq!(c.inactivity(), Duration::from_secs(30));
        assert_eq!(c.rate_limit, 100);
        assert_eq!(c.rate_period(), Duration::from_secs(300));
        assert_eq!(c.max_buffered, 100 * 1024);
    }

    #[test]
    fn args_defaults_match_config_defaults() {
        let args = Args::try_parse_from(["drpcs"]).unwrap();
        let c = ServerConfig::from(args);
        let d = ServerConfig::default();
        assert_eq!(c.path, d.path);
        assert_eq!(c.heartbeat_interval, d.heartbeat_interval);
        assert_eq!(c.inactivity_timeout, d.inactivity_timeout);
        assert_eq!(c.rate_limit, d.rate_limit);
        assert_eq!(c.rate_window, d.rate_window);
        assert_eq!(c.max_buffered, d.max_buffered);
        assert_eq!(c.max_payload, d.max_payload);
    }

    #[test]
    fn path_must_be_absolute() {
        let mut c = valid_config();
        c.path = "api/ws".into();
        assert!(c.validate().unwrap_err().contains("path"));
    }

    #[test]
    fn max_conns_zero() {
        let mut c = valid_config();
        c.max_conns = 0;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_conns_too_large() {
        let mut c = valid_config();
        c.max_conns = 1_000_001;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn rate_limit_zero() {
        let mut c = valid_config();
        c.rate_limit = 0;
        assert!(c.validate().unwrap_err().contains("rate_limit"));
    }

    #[test]
    fn rate_window_zero() {
        let mut c = valid_config();
        c.rate_window = 0;
        assert!(c.validate().unwrap_err().contains("rate_window"));
    }

    #[test]
    fn max_buffered_zero() {
        let mut c = valid_config();
        c.max_buffered = 0;
        assert!(c.validate().unwrap_err().contains("max_buffered"));
    }

    #[test]
    fn max_payload_too_large() {
        let mut c = valid_config();
        c.max_payload = 16 * 1024 * 1024 + 1;
        assert!(c.validate().unwrap_err().contains("max_payload"));
    }

    #[test]
    fn heartbeat_zero() {
        let mut c = valid_config();
        c.heartbeat_interval = 0;
        assert!(c.validate().unwrap_err().contains("heartbeat_interval"));
    }

    #[test]
    fn inactivity_too_large() {
        let mut c = valid_config();
        c.inactivity_timeout = 86_401;
        assert!(c.validate().unwrap_err().contains("inactivity_timeout"));
    }

    #[test]
    fn heartbeat_must_be_shorter_than_inactivity() {
        let mut c = valid_config();
        c.heartbeat_interval = 30;
        assert!(c.validate().unwrap_err().contains("heartbeat_interval"));
    }

    #[test]
    fn boundary_values_valid() {
        let mut c = valid_config();
        c.max_conns = 1;
        c.rate_limit = 1;
        c.rate_window = 1;
        c.max_buffered = 1;
        c.max_payload = 1;
        c.heartbeat_interval = 1;
        c.inactivity_timeout = 2;
        assert!(c.validate().is_ok());
    }
}
