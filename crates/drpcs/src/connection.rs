use crate::config::ServerConfig;
use crate::endpoint::{Endpoints, StreamHandle};
use crate::metrics::{counters, histograms};
use crate::presence::PresenceHandler;
use crate::ratelimit::RateLimiter;
use crate::registry::ConnectionRegistry;
use drpc_common::protocol::{ClientMessage, ServerMessage};
use drpc_common::{Args, Inbound, RequestId, Transport};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No inbound message within the inactivity timeout.
    Inactivity,
    /// Inbound rate limit exceeded.
    RateLimited,
    /// Inbound payload was not valid JSON or not a valid message.
    Malformed,
    /// `subscribe` named an unregistered stream.
    UnknownStream,
    /// `call` named an unregistered mutation.
    UnknownMutation,
    /// `presence` received but no presence handler is configured.
    PresenceUnsupported,
    /// A stream endpoint or stream handle failed.
    StreamFailed,
    /// A mutation endpoint returned an error instead of a result.
    MutationFailed,
    /// The transport's send buffer exceeded the ceiling.
    Backpressure,
    /// The transport rejected a send.
    SendFailed,
    /// The peer or the transport closed.
    TransportClosed,
    /// Closed by the server application.
    Server,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactivity => "inactivity",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::UnknownStream => "unknown_stream",
            Self::UnknownMutation => "unknown_mutation",
            Self::PresenceUnsupported => "presence_unsupported",
            Self::StreamFailed => "stream_failed",
            Self::MutationFailed => "mutation_failed",
            Self::Backpressure => "backpressure",
            Self::SendFailed => "send_failed",
            Self::TransportClosed => "transport_closed",
            Self::Server => "server",
        }
    }
}

/// Presence payload of a connection. `busy` is set while dispatch is
/// calling the handler; shutdown then leaves the `remove` to dispatch.
#[derive(Default)]
struct PresenceSlot {
    data: Option<Args>,
    busy: bool,
}

/// Server side of one client connection.
///
/// Inbound messages are rate limited and parsed by the reader loop, then
/// dispatched strictly one at a time. Once closed, a connection never
/// sends again; late endpoint completions are dropped.
pub struct Connection<C> {
    id: u64,
    transport: Arc<dyn Transport>,
    config: Arc<ServerConfig>,
    endpoints: Arc<Endpoints<C>>,
    presence: Option<Arc<dyn PresenceHandler>>,
    context: Arc<C>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    streams: Mutex<HashMap<RequestId, Box<dyn StreamHandle>>>,
    presence_slot: Mutex<PresenceSlot>,
    last_send: Mutex<Instant>,
    registry: Weak<ConnectionRegistry<C>>,
}

impl<C: Send + Sync + 'static> Connection<C> {
    pub(crate) fn new(
        id: u64,
        transport: Arc<dyn Transport>,
        config: Arc<ServerConfig>,
        endpoints: Arc<Endpoints<C>>,
        presence: Option<Arc<dyn PresenceHandler>>,
        context: Arc<C>,
        registry: Weak<ConnectionRegistry<C>>,
    ) -> Self {
        Self {
            id,
            transport,
            config,
            endpoints,
            presence,
            context,
            closed: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
            streams: Mutex::new(HashMap::new()),
            presence_slot: Mutex::new(PresenceSlot::default()),
            last_send: Mutex::new(Instant::now()),
            registry,
        }
    }

    /// Server-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.lock_streams().len()
    }

    /// Closes the connection from the application side.
    pub fn close(&self) {
        self.shutdown(CloseReason::Server);
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<RequestId, Box<dyn StreamHandle>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_presence(&self) -> MutexGuard<'_, PresenceSlot> {
        self.presence_slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_send(&self) -> Instant {
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads inbound messages until the connection closes.
    pub(crate) async fn run(self: Arc<Self>, mut inbound: Inbound) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().dispatch_loop(queue_rx));

        let heartbeat = self.config.heartbeat();
        let inactivity = self.config.inactivity();
        let mut limiter = RateLimiter::new(self.config.rate_limit, self.config.rate_period());
        let mut closed_rx = self.closed_tx.subscribe();
        let mut inactive_at = Instant::now() + inactivity;

        while !self.is_closed() {
            let heartbeat_at = self.last_send() + heartbeat;
            tokio::select! {
                _ = closed_rx.changed() => break,
                msg = inbound.recv() => {
                    let Some(text) = msg else {
                        self.shutdown(CloseReason::TransportClosed);
                        break;
                    };
                    inactive_at = Instant::now() + inactivity;
                    if limiter.trigger() {
                        self.shutdown(CloseReason::RateLimited);
                        break;
                    }
                    match ClientMessage::parse(&text) {
                        Ok(msg) => {
                            counters::messages_received_total(msg.kind());
                            if queue_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(conn_id = self.id, error = %e, "rejecting malformed message");
                            self.shutdown(CloseReason::Malformed);
                            break;
                        }
                    }
                }
                _ = sleep_until(inactive_at) => {
                    self.shutdown(CloseReason::Inactivity);
                    break;
                }
                _ = sleep_until(heartbeat_at) => {
                    // A send since the sleep started pushes the deadline out.
                    if Instant::now() >= self.last_send() + heartbeat {
                        self.send_message(&ServerMessage::Heartbeat);
                    }
                }
            }
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<ClientMessage>) {
        while let Some(msg) = queue.recv().await {
            if self.is_closed() {
                break;
            }
            if let Err(reason) = self.dispatch(msg).await {
                self.shutdown(reason);
                break;
            }
        }
    }

    async fn dispatch(&self, msg: ClientMessage) -> Result<(), CloseReason> {
        match msg {
            ClientMessage::Subscribe { id, name, args } => {
                let Some(open) = self.endpoints.open_stream(&name, args, self.context.clone())
                else {
                    debug!(conn_id = self.id, name = %name, "subscribe to unknown stream");
                    return Err(CloseReason::UnknownStream);
                };
                let start = std::time::Instant::now();
                let handle = open.await.map_err(|e| {
                    debug!(conn_id = self.id, name = %name, error = %e, "stream endpoint failed");
                    CloseReason::StreamFailed
                })?;
                histograms::endpoint_latency_seconds("stream", start.elapsed().as_secs_f64());
                // A step must either land before the snapshot is read or
                // see the stream only after its snapshot went out.
                let mut streams = self.lock_streams();
                if self.is_closed() {
                    return Ok(());
                }
                let snapshot = handle.snapshot().map_err(|e| {
                    debug!(conn_id = self.id, name = %name, error = %e, "stream snapshot failed");
                    CloseReason::StreamFailed
                })?;
                streams.insert(id, handle);
                debug!(conn_id = self.id, id, name = %name, "subscribed");
                self.deliver(&ServerMessage::snapshot(id, snapshot))?;
            }
            ClientMessage::Unsubscribe { id } => {
                if self.lock_streams().remove(&id).is_some() {
                    debug!(conn_id = self.id, id, "unsubscribed");
                }
            }
            ClientMessage::Call { id, name, args } => {
                let Some(call) = self.endpoints.call_mutation(&name, args, self.context.clone())
                else {
                    debug!(conn_id = self.id, name = %name, "call to unknown mutation");
                    return Err(CloseReason::UnknownMutation);
                };
                let start = std::time::Instant::now();
                let outcome = call.await.map_err(|e| {
                    warn!(conn_id = self.id, name = %name, error = %e, "mutation endpoint failed");
                    CloseReason::MutationFailed
                })?;
                histograms::endpoint_latency_seconds("mutation", start.elapsed().as_secs_f64());
                let label = if outcome.is_success() { "success" } else { "error" };
                counters::mutations_total(label);
                debug!(conn_id = self.id, id, name = %name, outcome = label, "mutation done");
                self.send_message(&ServerMessage::result(id, outcome));
            }
            ClientMessage::Heartbeat => {}
            ClientMessage::Presence { data } => {
                let Some(presence) = &self.presence else {
                    return Err(CloseReason::PresenceUnsupported);
                };
                let previous = {
                    let mut slot = self.lock_presence();
                    if self.is_closed() {
                        return Ok(());
                    }
                    slot.busy = true;
                    slot.data.replace(data.clone())
                };
                match previous {
                    None => presence.add(&data),
                    Some(previous) => presence.update(&previous, &data),
                }
                let orphaned = {
                    let mut slot = self.lock_presence();
                    slot.busy = false;
                    if self.is_closed() {
                        slot.data.take()
                    } else {
                        None
                    }
                };
                if let Some(data) = orphaned {
                    presence.remove(&data);
                }
            }
        }
        Ok(())
    }

    /// Sends the changes of every subscription that changed in the last
    /// computation step as one coalesced `delta` message.
    pub fn handle_step(&self) {
        if self.is_closed() {
            return;
        }
        let outcome = {
            // Held through the send so deltas cannot pass a snapshot.
            let streams = self.lock_streams();
            let collected: anyhow::Result<BTreeMap<RequestId, serde_json::Value>> = streams
                .iter()
                .filter_map(|(id, handle)| match handle.last_change() {
                    Ok(Some(change)) => Some(Ok((*id, change))),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                })
                .collect();
            match collected {
                Ok(changes) if changes.is_empty() => Ok(()),
                Ok(changes) => {
                    counters::deltas_sent_total();
                    self.deliver(&ServerMessage::delta(changes))
                }
                Err(e) => {
                    debug!(conn_id = self.id, error = %e, "stream change failed");
                    Err(CloseReason::StreamFailed)
                }
            }
        };
        if let Err(reason) = outcome {
            self.shutdown(reason);
        }
    }

    /// Sends one message unless closed. Closes instead when the transport
    /// is over its buffer ceiling or rejects the send.
    pub(crate) fn send_message(&self, msg: &ServerMessage) {
        if let Err(reason) = self.deliver(msg) {
            self.shutdown(reason);
        }
    }

    /// Sends without closing, so it may run under the streams lock. The
    /// caller shuts down on error once the lock is released.
    fn deliver(&self, msg: &ServerMessage) -> Result<(), CloseReason> {
        if self.is_closed() {
            return Ok(());
        }
        if let Some(buffered) = self.transport.buffered_amount() {
            if buffered > self.config.max_buffered {
                debug!(conn_id = self.id, buffered, "send buffer over ceiling");
                return Err(CloseReason::Backpressure);
            }
        }
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(conn_id = self.id, kind = msg.kind(), error = %e, "failed to encode message");
                return Ok(());
            }
        };
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        counters::payload_bytes_out_total(text.len() as u64);
        self.transport.send(text).map_err(|e| {
            debug!(conn_id = self.id, error = %e, "send failed");
            CloseReason::SendFailed
        })
    }

    /// Closes the connection. Only the first call has any effect.
    pub(crate) fn shutdown(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(conn_id = self.id, reason = reason.as_str(), "connection closed");
        counters::connections_closed_total(reason.as_str());
        let departed = {
            let mut slot = self.lock_presence();
            if slot.busy {
                None
            } else {
                slot.data.take()
            }
        };
        if let (Some(presence), Some(data)) = (&self.presence, departed) {
            presence.remove(&data);
        }
        self.lock_streams().clear();
        self.transport.close();
        self.closed_tx.send_replace(true);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
