//! Computation-graph collaborator interfaces and a minimal in-process graph.
//!
//! The RPC layer never computes stream contents itself. It reads the
//! current value and the change produced by the most recent step, and it
//! hooks into the end of each step to broadcast. [`LocalGraph`] provides
//! just enough of that contract for input-only graphs: values staged on an
//! input become visible, together with their change, when the graph steps.

use crate::collection::{ZMap, ZSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A graph that can be advanced one step.
pub trait Graph: Send + Sync {
    /// Commits all staged input and runs the after-step hooks.
    fn step(&self);
}

/// A reactive whole value.
pub trait ReactiveValue<T>: Send + Sync {
    /// Current committed value.
    fn value(&self) -> T;
    /// Value set during the last step, if it changed.
    fn last_change(&self) -> Option<T>;
}

/// A reactive weighted set.
pub trait ReactiveSet<T: Eq + Hash>: Send + Sync {
    /// Current committed contents.
    fn snapshot(&self) -> ZSet<T>;
    /// Weights added during the last step, if any.
    fn last_change(&self) -> Option<ZSet<T>>;
}

/// A reactive weighted map.
pub trait ReactiveMap<K: Eq + Hash, V: Eq + Hash>: Send + Sync {
    /// Current committed contents.
    fn snapshot(&self) -> ZMap<K, V>;
    /// Rows added during the last step, if any.
    fn last_change(&self) -> Option<ZMap<K, V>>;
}

trait Node: Send + Sync {
    fn commit(&self);
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// In-process graph of input nodes.
///
/// Nodes are held weakly: an input dropped by all of its owners is pruned
/// on the next step.
#[derive(Default)]
pub struct LocalGraph {
    nodes: Mutex<Vec<Weak<dyn Node>>>,
    hooks: Mutex<Vec<Hook>>,
    stepping: Mutex<()>,
}

impl std::fmt::Debug for LocalGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGraph")
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}

impl LocalGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register<N: Node + 'static>(&self, node: &Arc<N>) {
        let node: Arc<dyn Node> = node.clone();
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&node));
    }

    /// Adds a whole-value input.
    pub fn input_value<T>(&self, initial: T) -> Arc<InputValue<T>>
    where
        T: Clone + Send + 'static,
    {
        let node = Arc::new(InputValue {
            state: Mutex::new(ValueState {
                current: initial,
                pending: None,
                last_change: None,
            }),
        });
        self.register(&node);
        node
    }

    /// Adds a weighted-set input.
    pub fn input_set<T>(&self, initial: ZSet<T>) -> Arc<InputSet<T>>
    where
        T: Clone + Eq + Hash + Send + 'static,
    {
        let node = Arc::new(InputSet {
            state: Mutex::new(CollectionState::new(initial)),
        });
        self.register(&node);
        node
    }

    /// Adds a weighted-map input.
    pub fn input_map<K, V>(&self, initial: ZMap<K, V>) -> Arc<InputMap<K, V>>
    where
        K: Clone + Eq + Hash + Send + 'static,
        V: Clone + Eq + Hash + Send + 'static,
    {
        let node = Arc::new(InputMap {
            state: Mutex::new(CollectionState::new(initial)),
        });
        self.register(&node);
        node
    }

    /// Registers a hook run after every step, once all inputs committed.
    pub fn after_step<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Number of live input nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|n| n.strong_count() > 0)
            .count()
    }
}

impl Graph for LocalGraph {
    fn step(&self) {
        {
            let _stepping = self.stepping.lock().unwrap_or_else(PoisonError::into_inner);
            let live: Vec<Arc<dyn Node>> = {
                let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
                nodes.retain(|n| n.strong_count() > 0);
                nodes.iter().filter_map(Weak::upgrade).collect()
            };
            for node in &live {
                node.commit();
            }
        }
        // Hooks may stage input or step again, so no lock is held here.
        let hooks: Vec<Hook> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }
}

struct ValueState<T> {
    current: T,
    pending: Option<T>,
    last_change: Option<T>,
}

/// Whole-value input node.
pub struct InputValue<T> {
    state: Mutex<ValueState<T>>,
}

impl<T: Clone + Send> InputValue<T> {
    /// Stages `value` to become current on the next step.
    pub fn set(&self, value: T) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending = Some(value);
    }
}

impl<T: Clone + Send> ReactiveValue<T> for InputValue<T> {
    fn value(&self) -> T {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn last_change(&self) -> Option<T> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_change
            .clone()
    }
}

impl<T: Clone + Send> Node for InputValue<T> {
    fn commit(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_change = state.pending.take();
        if let Some(value) = &state.last_change {
            state.current = value.clone();
        }
    }
}

struct CollectionState<C> {
    current: C,
    pending: C,
    last_change: Option<C>,
}

impl<C: Default> CollectionState<C> {
    fn new(initial: C) -> Self {
        Self {
            current: initial,
            pending: C::default(),
            last_change: None,
        }
    }
}

/// Weighted-set input node.
pub struct InputSet<T: Eq + Hash> {
    state: Mutex<CollectionState<ZSet<T>>>,
}

impl<T: Clone + Eq + Hash + Send> InputSet<T> {
    /// Stages `weight` for `item`.
    pub fn add(&self, item: T, weight: i64) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .add(item, weight);
    }

    /// Stages a whole change set.
    pub fn push(&self, change: ZSet<T>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .merge(change);
    }
}

impl<T: Clone + Eq + Hash + Send> ReactiveSet<T> for InputSet<T> {
    fn snapshot(&self) -> ZSet<T> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn last_change(&self) -> Option<ZSet<T>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_change
            .clone()
    }
}

impl<T: Clone + Eq + Hash + Send> Node for InputSet<T> {
    fn commit(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let change = std::mem::take(&mut state.pending);
        if change.is_empty() {
            state.last_change = None;
        } else {
            state.current.merge(change.clone());
            state.last_change = Some(change);
        }
    }
}

/// Weighted-map input node.
pub struct InputMap<K: Eq + Hash, V: Eq + Hash> {
    state: Mutex<CollectionState<ZMap<K, V>>>,
}

impl<K, V> InputMap<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Eq + Hash + Send,
{
    /// Stages `weight` for the `(key, value)` row.
    pub fn add(&self, key: K, value: V, weight: i64) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .add(key, value, weight);
    }

    /// Stages a whole change set.
    pub fn push(&self, change: ZMap<K, V>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .merge(change);
    }
}

impl<K, V> ReactiveMap<K, V> for InputMap<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Eq + Hash + Send,
{
    fn snapshot(&self) -> ZMap<K, V> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn last_change(&self) -> Option<ZMap<K, V>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_change
            .clone()
    }
}

impl<K, V> Node for InputMap<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Eq + Hash + Send,
{
    fn commit(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let change = std::mem::take(&mut state.pending);
        if change.is_empty() {
            state.last_change = None;
        } else {
            state.current.merge(change.clone());
            state.last_change = Some(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn value_change_visible_after_step() {
        let graph = LocalGraph::new();
        let input = graph.input_value(1);
        input.set(2);
        assert_eq!(input.value(), 1);
        assert_eq!(input.last_change(), None);

        graph.step();
        assert_eq!(input.value(), 2);
        assert_eq!(input.last_change(), Some(2));

        graph.step();
        assert_eq!(input.last_change(), None);
    }

    #[test]
    fn set_change_is_the_staged_weights() {
        let graph = LocalGraph::new();
        let todos = graph.input_set(ZSet::from_iter([("a", 1)]));
        todos.add("b", 1);
        todos.add("a", -1);
        graph.step();

        let snapshot = todos.snapshot();
        assert!(snapshot.contains(&"b"));
        assert!(!snapshot.contains(&"a"));
        let change = todos.last_change().unwrap();
        assert_eq!(change.weight(&"a"), -1);
        assert_eq!(change.weight(&"b"), 1);
    }

    #[test]
    fn empty_set_change_is_none() {
        let graph = LocalGraph::new();
        let todos = graph.input_set::<u8>(ZSet::new());
        todos.add(1, 1);
        todos.add(1, -1);
        graph.step();
        assert!(todos.last_change().is_none());
    }

    #[test]
    fn map_rows_commit() {
        let graph = LocalGraph::new();
        let users = graph.input_map::<String, u32>(ZMap::new());
        users.add("ada".into(), 36, 1);
        graph.step();
        assert_eq!(users.snapshot().len(), 1);
        assert!(users.last_change().is_some());
    }

    #[test]
    fn after_step_runs_after_commit() {
        let graph = Arc::new(LocalGraph::new());
        let input = graph.input_value(0u32);
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let input = input.clone();
            let seen = seen.clone();
            graph.after_step(move || {
                seen.store(input.value() as usize, Ordering::SeqCst);
            });
        }
        input.set(7);
        graph.step();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn dropped_nodes_are_pruned() {
        let graph = LocalGraph::new();
        let keep = graph.input_value(1);
        drop(graph.input_value(2));
        assert_eq!(graph.node_count(), 1);
        graph.step();
        assert_eq!(graph.nodes.lock().unwrap().len(), 1);
        drop(keep);
        assert_eq!(graph.node_count(), 0);
    }
}
