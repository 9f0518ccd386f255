use drpc_common::Args;
use std::sync::{Mutex, PoisonError};

/// Receives presence transitions for every connection of a server.
///
/// Calls for one connection arrive in order: one `add`, any number of
/// `update`s, then one `remove` when the connection closes.
pub trait PresenceHandler: Send + Sync {
    /// First presence payload published by a connection.
    fn add(&self, data: &Args);
    /// Replacement of a connection's presence payload.
    fn update(&self, previous: &Args, next: &Args);
    /// The connection holding `data` went away.
    fn remove(&self, data: &Args);
}

/// In-memory presence list holding the current payload of every connection.
#[derive(Debug, Default)]
pub struct PresenceSet {
    entries: Mutex<Vec<Args>>,
}

impl PresenceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current payloads, in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Args> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of present connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PresenceHandler for PresenceSet {
    fn add(&self, data: &Args) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.clone());
    }

    fn update(&self, previous: &Args, next: &Args) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|entry| *entry == previous) {
            Some(entry) => *entry = next.clone(),
            None => entries.push(next.clone()),
        }
    }

    fn remove(&self, data: &Args) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = entries.iter().position(|entry| entry == data) {
            entries.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(name: &str) -> Args {
        let mut args = Args::new();
        args.insert("name".into(), json!(name));
        args
    }

    #[test]
    fn add_update_remove() {
        let set = PresenceSet::new();
        set.add(&payload("ada"));
        set.add(&payload("bob"));
        set.update(&payload("ada"), &payload("ada-away"));
        assert_eq!(set.snapshot(), vec![payload("ada-away"), payload("bob")]);
        set.remove(&payload("bob"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_drops_one_duplicate() {
        let set = PresenceSet::new();
        set.add(&payload("x"));
        set.add(&payload("x"));
        set.remove(&payload("x"));
        assert_eq!(set.len(), 1);
        set.remove(&payload("missing"));
        assert!(!set.is_empty());
    }
}
