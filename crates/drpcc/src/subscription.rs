use crate::client::ClientInner;
use drpc_common::RequestId;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Sends `unsubscribe` exactly once, on explicit release or on drop.
struct Guard {
    id: RequestId,
    client: Weak<ClientInner>,
    released: AtomicBool,
}

impl Guard {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(client) = self.client.upgrade() {
            client.unsubscribe(self.id);
        }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a live subscription and its local mirror.
///
/// Dereferences to the mirror's view. Clones share one wire subscription;
/// `unsubscribe` is sent when the last clone is dropped.
pub struct Subscription<V> {
    view: Arc<V>,
    guard: Arc<Guard>,
}

impl<V> Clone for Subscription<V> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<V> Subscription<V> {
    pub(crate) fn new(id: RequestId, view: Arc<V>, client: Weak<ClientInner>) -> Self {
        Self {
            view,
            guard: Arc::new(Guard {
                id,
                client,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Subscription id on the wire.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.guard.id
    }

    /// Ends the subscription now for every clone. The view keeps its last
    /// contents but receives no further changes.
    pub fn unsubscribe(&self) {
        self.guard.release();
    }
}

impl<V> Deref for Subscription<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.view
    }
}

impl<V> std::fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.guard.id)
            .field("released", &self.guard.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
