use crate::error::ClientError;
use crate::sink::{Applier, Mirror, Sink};
use crate::subscription::Subscription;
use drpc_common::protocol::UNKNOWN_ERROR;
use drpc_common::{
    Args, ClientMessage, Graph, Inbound, LocalGraph, MutationResult, RequestId, ServerMessage,
    Transport,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Builds the mirror for a snapshot on the driver task and hands its view
/// to the waiting `run`.
type Builder = Box<dyn FnOnce(&ClientInner, RequestId, Value) + Send>;

#[derive(Default)]
struct ClientState {
    pending_snapshots: HashMap<RequestId, Builder>,
    pending_calls: HashMap<RequestId, oneshot::Sender<MutationResult>>,
    active: HashMap<RequestId, Applier>,
}

pub(crate) struct ClientInner {
    transport: Arc<dyn Transport>,
    graph: Arc<LocalGraph>,
    heartbeat: Duration,
    next_id: AtomicI64,
    state: Mutex<ClientState>,
    last_send: Mutex<Instant>,
    closed: watch::Sender<bool>,
}

impl ClientInner {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_send(&self) -> Instant {
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Disconnected);
        }
        let text = msg.encode()?;
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.transport.send(text)?;
        Ok(())
    }

    /// Drops a subscription locally and tells the server. A no-op for ids
    /// that are not active.
    pub(crate) fn unsubscribe(&self, id: RequestId) {
        if self.lock_state().active.remove(&id).is_none() {
            return;
        }
        debug!(id, "unsubscribing");
        self.send_unsubscribe(id);
    }

    fn send_unsubscribe(&self, id: RequestId) {
        if let Err(e) = self.send(&ClientMessage::unsubscribe(id)) {
            debug!(id, error = %e, "unsubscribe not sent");
        }
    }

    fn handle_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Heartbeat => {}
            ServerMessage::Snapshot { id, snapshot } => {
                let Some(builder) = self.lock_state().pending_snapshots.remove(&id) else {
                    debug!(id, "snapshot for unknown subscription");
                    return;
                };
                builder(self, id, snapshot);
            }
            ServerMessage::Delta { changes } => self.apply_delta(changes),
            ServerMessage::Result {
                id,
                success,
                value,
                error,
            } => {
                let outcome = if success {
                    MutationResult::Success(value.unwrap_or(Value::Null))
                } else {
                    MutationResult::Error(error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
                };
                match self.lock_state().pending_calls.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(id, "result for unknown call"),
                }
            }
        }
    }

    fn apply_delta(&self, changes: BTreeMap<RequestId, Value>) {
        let mut gone = Vec::new();
        {
            let state = self.lock_state();
            for (id, change) in changes {
                let Some(apply) = state.active.get(&id) else {
                    debug!(id, "change for inactive subscription");
                    continue;
                };
                match apply(change) {
                    Ok(true) => {}
                    Ok(false) => gone.push(id),
                    Err(e) => warn!(id, error = %e, "failed to apply change"),
                }
            }
        }
        for id in gone {
            self.unsubscribe(id);
        }
        self.graph.step();
    }

    fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut state = self.lock_state();
        // Dropping the senders fails every waiting request.
        state.pending_snapshots.clear();
        state.pending_calls.clear();
        state.active.clear();
        drop(state);
        self.transport.close();
        debug!("client closed");
    }
}

async fn drive(inner: Arc<ClientInner>, mut inbound: Inbound) {
    let mut closed_rx = inner.closed.subscribe();
    while !inner.is_closed() {
        let heartbeat_at = inner.last_send() + inner.heartbeat;
        tokio::select! {
            _ = closed_rx.changed() => break,
            msg = inbound.recv() => {
                let Some(text) = msg else { break };
                match ServerMessage::parse(&text) {
                    Ok(msg) => inner.handle_message(msg),
                    Err(e) => warn!(error = %e, "ignoring malformed server message"),
                }
            }
            _ = sleep_until(heartbeat_at) => {
                if Instant::now() >= inner.last_send() + inner.heartbeat {
                    if let Err(e) = inner.send(&ClientMessage::Heartbeat) {
                        debug!(error = %e, "heartbeat not sent");
                    }
                }
            }
        }
    }
    inner.shutdown();
}

/// Client side of one connection: subscriptions, calls and presence.
///
/// Cloning is cheap; all clones share the connection. A background task
/// reads server messages and sends a heartbeat after every `heartbeat` of
/// send silence, so the server's inactivity timer never fires on an idle
/// but healthy client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts a client over an established transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        graph: Arc<LocalGraph>,
        heartbeat: Duration,
    ) -> Self {
        let inner = Arc::new(ClientInner {
            transport,
            graph,
            heartbeat,
            next_id: AtomicI64::new(1),
            state: Mutex::new(ClientState::default()),
            last_send: Mutex::new(Instant::now()),
            closed: watch::channel(false).0,
        });
        tokio::spawn(drive(inner.clone(), inbound));
        Self { inner }
    }

    fn next_id(&self) -> RequestId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Graph that subscription mirrors live on.
    #[must_use]
    pub fn graph(&self) -> &Arc<LocalGraph> {
        &self.inner.graph
    }

    /// Subscribes to a stream and mirrors it locally through `sink`.
    ///
    /// Resolves once the snapshot has arrived and the mirror is built. The
    /// subscription stays open until the last clone of the returned handle
    /// is dropped or [`Subscription::unsubscribe`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the connection closes first
    /// and [`ClientError::Sink`] if the snapshot cannot be mirrored.
    pub async fn run<S: Sink>(
        &self,
        name: &str,
        args: Args,
        sink: S,
    ) -> Result<Subscription<S::View>, ClientError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        let builder: Builder = Box::new(move |inner, id, snapshot| {
            match sink.build(&inner.graph, snapshot) {
                Ok(Mirror { view, apply }) => {
                    // Active before the handle exists, so its drop always
                    // finds the entry to unsubscribe.
                    inner.lock_state().active.insert(id, apply);
                    if tx.send(Ok(view)).is_err() {
                        inner.unsubscribe(id);
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    inner.send_unsubscribe(id);
                }
            }
        });
        self.inner.lock_state().pending_snapshots.insert(id, builder);
        if let Err(e) = self.inner.send(&ClientMessage::subscribe(id, name, args)) {
            self.inner.lock_state().pending_snapshots.remove(&id);
            return Err(e);
        }
        debug!(id, name, "subscribing");

        let view = rx.await.map_err(|_| ClientError::Disconnected)??;
        Ok(Subscription::new(id, view, Arc::downgrade(&self.inner)))
    }

    /// Invokes a mutation and waits for its result.
    ///
    /// A business failure is `Ok(MutationResult::Error(_))`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the connection closes first.
    pub async fn call(&self, name: &str, args: Args) -> Result<MutationResult, ClientError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.lock_state().pending_calls.insert(id, tx);
        if let Err(e) = self.inner.send(&ClientMessage::call(id, name, args)) {
            self.inner.lock_state().pending_calls.remove(&id);
            return Err(e);
        }
        debug!(id, name, "calling");
        rx.await.map_err(|_| ClientError::Disconnected)
    }

    /// Publishes this connection's presence payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be sent.
    pub fn set_presence(&self, data: Args) -> Result<(), ClientError> {
        self.inner.send(&ClientMessage::presence(data))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock_state().active.len()
    }

    /// Whether the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Waits until the connection closes.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Closes the connection. Outstanding requests fail with
    /// [`ClientError::Disconnected`].
    pub fn close(&self) {
        self.inner.shutdown();
    }
}
