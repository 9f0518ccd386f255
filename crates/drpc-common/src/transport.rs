//! Duplex text-message transports.
//!
//! A [`Transport`] is the sending half; inbound text arrives on the
//! [`Inbound`] channel returned alongside it. The channel ending is the
//! close notification: whichever side closes, both halves observe it.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Inbound text messages. `None` from `recv()` means the transport closed.
pub type Inbound = mpsc::UnboundedReceiver<String>;

/// Errors raised by [`Transport::send`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was already closed.
    #[error("transport closed")]
    Closed,
}

/// Sending half of a message-oriented duplex channel.
pub trait Transport: Send + Sync {
    /// Queues one text message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the transport has closed.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Closes both directions. Idempotent; never fails.
    fn close(&self);

    /// Bytes queued but not yet written, when the transport can tell.
    fn buffered_amount(&self) -> Option<usize> {
        None
    }
}

// ---------------------------------------------------------------------------
// In-process port
// ---------------------------------------------------------------------------

struct Port {
    to_left: Mutex<Option<mpsc::UnboundedSender<String>>>,
    to_right: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// One end of an in-process message port; see [`channel_pair`].
pub struct ChannelTransport {
    port: Arc<Port>,
    side: Side,
}

impl Transport for ChannelTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        let peer = match self.side {
            Side::Left => &self.port.to_right,
            Side::Right => &self.port.to_left,
        };
        let guard = peer.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.port
            .to_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.port
            .to_right
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Creates two connected in-process endpoints.
///
/// Messages sent on one end arrive on the other end's [`Inbound`]. Closing
/// either end ends both inbound streams once they are drained.
#[must_use]
pub fn channel_pair() -> (
    (Arc<ChannelTransport>, Inbound),
    (Arc<ChannelTransport>, Inbound),
) {
    let (to_left, left_rx) = mpsc::unbounded_channel();
    let (to_right, right_rx) = mpsc::unbounded_channel();
    let port = Arc::new(Port {
        to_left: Mutex::new(Some(to_left)),
        to_right: Mutex::new(Some(to_right)),
    });
    let left = Arc::new(ChannelTransport {
        port: port.clone(),
        side: Side::Left,
    });
    let right = Arc::new(ChannelTransport {
        port,
        side: Side::Right,
    });
    ((left, left_rx), (right, right_rx))
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

enum Outgoing {
    Text(String),
    Close,
}

/// Transport over an established WebSocket stream.
///
/// A writer task drains an unbounded queue into the socket; the number of
/// queued bytes is reported as the buffered amount.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outgoing>,
    buffered: Arc<AtomicUsize>,
    closed: Arc<watch::Sender<bool>>,
}

impl WebSocketTransport {
    /// Splits `stream` and spawns its reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: WebSocketStream<S>) -> (Arc<Self>, Inbound)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(watch::channel(false).0);

        let mut reader_closed = closed.subscribe();
        let writer_buffered = buffered.clone();
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                match out {
                    Outgoing::Text(text) => {
                        let len = text.len();
                        let sent = ws_tx.send(Message::Text(text)).await;
                        writer_buffered.fetch_sub(len, Ordering::Relaxed);
                        if let Err(e) = sent {
                            tracing::debug!("websocket write failed: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = ws_tx.close().await;
            writer_closed.send_replace(true);
        });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_closed.changed() => break,
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            let text = String::from_utf8_lossy(&data).into_owned();
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::debug!("websocket read failed: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        });

        let transport = Arc::new(Self {
            outbound,
            buffered,
            closed,
        });
        (transport, inbound_rx)
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        let len = text.len();
        self.buffered.fetch_add(len, Ordering::Relaxed);
        self.outbound.send(Outgoing::Text(text)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::Relaxed);
            TransportError::Closed
        })
    }

    fn close(&self) {
        if !self.closed.send_replace(true) {
            let _ = self.outbound.send(Outgoing::Close);
        }
    }

    fn buffered_amount(&self) -> Option<usize> {
        Some(self.buffered.load(Ordering::Relaxed))
    }
}
