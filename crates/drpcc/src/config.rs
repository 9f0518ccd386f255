use clap::{Parser, Subcommand};
use drpc_common::types::{defaults, DEFAULT_PATH};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI interface for the drpc client.
#[derive(Parser)]
#[command(name = "drpcc", about = "Reactive RPC client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server URL override.
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a stream and print its snapshot and every change.
    Subscribe {
        /// Stream name.
        name: String,
        /// Stream arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Invoke a mutation and print its result.
    Call {
        /// Mutation name.
        name: String,
        /// Mutation arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the server endpoint.
    pub url: String,
    /// Seconds of send silence before a heartbeat is sent.
    pub heartbeat: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:8080{DEFAULT_PATH}"),
            heartbeat: defaults::HEARTBEAT_INTERVAL.as_secs(),
        }
    }
}

impl ClientConfig {
    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat)
    }

    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("server URL must not be empty".to_string());
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(format!(
                "server URL must start with ws:// or wss://, got: {}",
                self.url
            ));
        }

        if self.heartbeat == 0 {
            return Err("heartbeat must be greater than 0".to_string());
        }
        // The server closes after 30s without inbound traffic.
        if self.heartbeat >= defaults::INACTIVITY_TIMEOUT.as_secs() {
            return Err(format!(
                "heartbeat must be below the server inactivity timeout ({}s)",
                defaults::INACTIVITY_TIMEOUT.as_secs()
            ));
        }

        Ok(())
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default("url", defaults.url.as_str())?
        .set_default("heartbeat", defaults.heartbeat as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("DRPCC").separator("_"));

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}
