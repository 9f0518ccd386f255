#![forbid(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use drpc_common::iso;
use drpc_common::{Args, LocalGraph, MutationResult};
use drpcc::config::{load_config, Cli, Commands};
use drpcc::{connect, ValueSink};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(raw: &str) -> anyhow::Result<Args> {
    match serde_json::from_str::<Value>(raw).context("--args must be JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got: {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.url.clone() {
        config.url = url;
    }
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let graph = Arc::new(LocalGraph::new());
    let client = connect(&config.url, graph.clone(), &config).await?;

    match cli.command {
        Commands::Call { name, args } => {
            match client.call(&name, parse_args(&args)?).await? {
                MutationResult::Success(value) => println!("{value}"),
                MutationResult::Error(error) => anyhow::bail!("{name} failed: {error}"),
            }
            client.close();
        }
        Commands::Subscribe { name, args } => {
            // Raw JSON mirror: every change replaces the printed value.
            let stream = client
                .run(&name, parse_args(&args)?, ValueSink::new(iso::id::<Value>()))
                .await?;
            println!("{}", stream.get());

            let view = stream.clone();
            graph.after_step(move || {
                if let Some(change) = view.last_change() {
                    println!("{change}");
                }
            });

            tokio::select! {
                () = client.closed() => info!("server closed the connection"),
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    stream.unsubscribe();
                    client.close();
                }
            }
        }
    }

    Ok(())
}
