#![allow(dead_code)]

use drpc_common::graph::{Graph, InputSet};
use drpc_common::iso;
use drpc_common::transport::{channel_pair, ChannelTransport};
use drpc_common::{ClientMessage, Inbound, LocalGraph, MutationResult, Transport, ZSet};
use drpcs::config::ServerConfig;
use drpcs::error::ServerError;
use drpcs::source::{SetSource, ValueSource};
use drpcs::{ConnectionInfo, Endpoints, PresenceSet, RpcServer};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-connection context: the query string of the upgrade, if any.
pub struct Session {
    pub user: String,
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    }
}

pub struct Harness {
    pub server: Arc<RpcServer<Session>>,
    pub graph: Arc<LocalGraph>,
    pub todos: Arc<InputSet<String>>,
    pub presence: Arc<PresenceSet>,
}

fn endpoints(graph: Arc<LocalGraph>, todos: Arc<InputSet<String>>) -> Endpoints<Session> {
    let next_id = Arc::new(AtomicU64::new(7));
    let stream_todos = todos.clone();
    let whoami_graph = graph.clone();
    Endpoints::new()
        .stream("todos", move |_args, _session| {
            let todos = stream_todos.clone();
            async move { Ok(SetSource::new(todos, iso::id::<String>())) }
        })
        .stream("whoami", move |_args, session: Arc<Session>| {
            let graph = whoami_graph.clone();
            async move {
                Ok(ValueSource::new(
                    graph.input_value(session.user.clone()),
                    iso::id::<String>(),
                ))
            }
        })
        .stream("broken", |_args, _session| async {
            Err::<SetSource<iso::Identity<String>>, _>(anyhow::anyhow!("no such table"))
        })
        .mutation("addTodo", move |args, _session| {
            let todos = todos.clone();
            let graph = graph.clone();
            let next_id = next_id.clone();
            async move {
                let Some(title) = args.get("title").and_then(Value::as_str) else {
                    return Ok(MutationResult::Error("title is required".into()));
                };
                todos.add(title.to_string(), 1);
                graph.step();
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                Ok(MutationResult::Success(json!({ "id": id })))
            }
        })
        .mutation("slow", |_args, _session| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(MutationResult::Success(json!("slow")))
        })
        .mutation("explode", |_args, _session| async {
            Err(anyhow::anyhow!("database unavailable"))
        })
}

async fn session(info: ConnectionInfo) -> anyhow::Result<Session> {
    match info.query.as_deref() {
        Some("deny") => anyhow::bail!("access denied"),
        Some("slow") => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Session { user: "slow".into() })
        }
        Some(user) => Ok(Session { user: user.into() }),
        None => Ok(Session { user: "anon".into() }),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let graph = Arc::new(LocalGraph::new());
        let todos = graph.input_set(ZSet::new());
        let presence = Arc::new(PresenceSet::new());
        let server = Arc::new(
            RpcServer::new(config, endpoints(graph.clone(), todos.clone()), session)
                .with_presence(presence.clone()),
        );
        let weak = Arc::downgrade(&server);
        graph.after_step(move || {
            if let Some(server) = weak.upgrade() {
                server.broadcast_step();
            }
        });
        Self {
            server,
            graph,
            todos,
            presence,
        }
    }

    pub fn connect(&self) -> TestClient {
        self.connect_with(ConnectionInfo::default())
    }

    pub fn connect_with(&self, info: ConnectionInfo) -> TestClient {
        let ((server_end, server_rx), (client_end, client_rx)) = channel_pair();
        let server = self.server.clone();
        let task = tokio::spawn(async move {
            server
                .serve_transport(server_end as Arc<dyn Transport>, server_rx, info)
                .await
        });
        TestClient {
            transport: client_end,
            inbound: client_rx,
            task,
        }
    }

    /// Stages one todo and runs a graph step.
    pub fn add_todo(&self, title: &str) {
        self.todos.add(title.to_string(), 1);
        self.graph.step();
    }

    /// Waits until the server has no open connections.
    pub async fn wait_until_empty(&self) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while !self.server.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connections did not drain");
    }
}

pub fn query(query: &str) -> ConnectionInfo {
    ConnectionInfo {
        query: Some(query.to_string()),
        ..ConnectionInfo::default()
    }
}

pub struct TestClient {
    pub transport: Arc<ChannelTransport>,
    pub inbound: Inbound,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestClient {
    pub fn send_raw(&self, text: &str) {
        let _ = self.transport.send(text.to_string());
    }

    pub fn send(&self, msg: &ClientMessage) {
        self.send_raw(&msg.encode().unwrap());
    }

    /// Next server message, heartbeats included. `None` once closed.
    pub async fn recv_any(&mut self) -> Option<Value> {
        let text = tokio::time::timeout(RECV_TIMEOUT, self.inbound.recv())
            .await
            .expect("timed out waiting for server message")?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Next non-heartbeat server message.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = self.recv_any().await.expect("connection closed");
            if msg != json!({"type": "heartbeat"}) {
                return msg;
            }
        }
    }

    /// Drains messages until the server closes the transport and returns
    /// the non-heartbeat ones seen on the way.
    pub async fn closed(&mut self) -> Vec<Value> {
        let mut seen = Vec::new();
        while let Some(msg) = self.recv_any().await {
            if msg != json!({"type": "heartbeat"}) {
                seen.push(msg);
            }
        }
        seen
    }

    /// Issues a call and waits for its result, as an ordering barrier.
    pub async fn call(&mut self, id: i64, name: &str, args: Value) -> Value {
        let args = match args {
            Value::Object(map) => map,
            _ => drpc_common::Args::new(),
        };
        self.send(&ClientMessage::call(id, name, args));
        self.recv().await
    }
}

pub async fn start_ws_server(harness: &Harness) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = harness.server.clone();
    tokio::spawn(async move {
        drpcs::run(listener, server).await.unwrap();
    });
    addr
}
