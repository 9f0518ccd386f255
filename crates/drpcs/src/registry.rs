use crate::connection::Connection;
use crate::metrics::gauges;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Concurrent connection-id → connection table for one server.
///
/// Connections remove themselves when they close, so the table only holds
/// open connections.
pub struct ConnectionRegistry<C> {
    connections: DashMap<u64, Arc<Connection<C>>>,
    next_id: AtomicU64,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<C: Send + Sync + 'static> ConnectionRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a connection. A connection that already closed is not kept.
    pub fn insert(&self, conn: Arc<Connection<C>>) {
        let id = conn.id();
        if self.connections.insert(id, conn).is_none() {
            gauges::inc_connections_active();
        }
        // Close may have run before the insert and found nothing to remove.
        if self
            .connections
            .remove_if(&id, |_, conn| conn.is_closed())
            .is_some()
        {
            gauges::dec_connections_active();
        }
    }

    /// Remove a connection by id.
    pub fn remove(&self, id: u64) -> Option<Arc<Connection<C>>> {
        let removed = self.connections.remove(&id).map(|(_, conn)| conn);
        if removed.is_some() {
            gauges::dec_connections_active();
        }
        removed
    }

    /// Look up a connection by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Connection<C>>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Runs [`Connection::handle_step`] on every open connection.
    ///
    /// Handles are collected first so that connections closing (and
    /// removing themselves) during the pass never contend with the
    /// iteration's shard locks.
    pub fn broadcast_step(&self) {
        let handles: Vec<Arc<Connection<C>>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut subscriptions = 0;
        for conn in handles {
            conn.handle_step();
            subscriptions += conn.subscription_count();
        }
        gauges::subscriptions_active(subscriptions);
    }

    /// Closes every open connection.
    pub fn close_all(&self) {
        let handles: Vec<Arc<Connection<C>>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for conn in handles {
            conn.close();
        }
    }
}
