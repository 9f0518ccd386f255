#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use drpc_common::graph::{Graph, InputSet};
use drpc_common::iso;
use drpc_common::{LocalGraph, MutationResult, ZSet};
use drpcs::config::{Args, ServerConfig};
use drpcs::error::ServerError;
use drpcs::metrics::{start_metrics_server, HealthState};
use drpcs::source::SetSource;
use drpcs::{run_with_shutdown, ConnectionInfo, Endpoints, PresenceSet, RpcServer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Todo {
    id: u64,
    title: String,
}

/// Per-connection context of the demo endpoints.
struct Session {
    peer: Option<SocketAddr>,
}

struct TodoList {
    graph: Arc<LocalGraph>,
    todos: Arc<InputSet<Todo>>,
    next_id: AtomicU64,
}

impl TodoList {
    fn add(&self, title: String) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.todos.add(Todo { id, title }, 1);
        self.graph.step();
        id
    }
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn endpoints(list: Arc<TodoList>) -> Endpoints<Session> {
    let stream_list = list.clone();
    Endpoints::new()
        .stream("todos", move |_args, _session| {
            let todos = stream_list.todos.clone();
            async move { Ok(SetSource::new(todos, iso::id::<Todo>())) }
        })
        .mutation("addTodo", move |args, session: Arc<Session>| {
            let list = list.clone();
            async move {
                let Some(title) = args.get("title").and_then(|t| t.as_str()) else {
                    return Ok(MutationResult::Error("title is required".into()));
                };
                let id = list.add(title.to_string());
                info!(id, peer = ?session.peer, "todo added");
                Ok(MutationResult::Success(json!({ "id": id })))
            }
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config: ServerConfig = args.into();

    config.validate().map_err(ServerError::Config)?;

    let graph = Arc::new(LocalGraph::new());
    let list = Arc::new(TodoList {
        todos: graph.input_set(ZSet::new()),
        graph: graph.clone(),
        next_id: AtomicU64::new(1),
    });

    let server = Arc::new(
        RpcServer::new(config.clone(), endpoints(list), |info: ConnectionInfo| async move {
            Ok(Session { peer: info.peer })
        })
        .with_presence(Arc::new(PresenceSet::new())),
    );

    let weak = Arc::downgrade(&server);
    graph.after_step(move || {
        if let Some(server) = weak.upgrade() {
            server.broadcast_step();
        }
    });

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}{}", config.listen, config.path);

    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_metrics_server(config.metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                health_state.set_ready(false);
                let _ = shutdown_tx.send(());
            }
            // Keep the sender so the server is not shut down.
            Err(e) => {
                warn!("failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    if let Err(e) = run_with_shutdown(listener, server, shutdown_rx).await {
        tracing::error!("server error: {}", e);
    }

    Ok(())
}
