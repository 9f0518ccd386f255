//! Local mirrors of subscribed streams.
//!
//! A [`Sink`] turns the wire snapshot of a stream into an input node on the
//! client's [`LocalGraph`] plus a read-only view of it, and returns the
//! function that applies later wire changes to that node. The applier only
//! holds the node weakly: once every view is dropped it reports the mirror
//! as gone.

use drpc_common::graph::{InputMap, InputSet, InputValue, ReactiveMap, ReactiveSet, ReactiveValue};
use drpc_common::iso::{self, Iso, IsoError, ZMapIso, ZSetIso};
use drpc_common::{LocalGraph, ZMap, ZSet};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building or updating a local mirror.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Snapshot or change did not match the sink's converter.
    #[error("stream value does not match sink: {0}")]
    Decode(#[from] IsoError),
}

/// Applies one wire change to a mirror. Returns `Ok(false)` once the
/// mirror has been dropped.
pub type Applier = Box<dyn Fn(Value) -> Result<bool, SinkError> + Send + Sync>;

/// A freshly built mirror: the caller-facing view and its change applier.
pub struct Mirror<V> {
    /// Read-only view handed to the subscriber.
    pub view: Arc<V>,
    /// Change applier kept by the client.
    pub apply: Applier,
}

/// Converts a stream's wire form into a local mirror.
pub trait Sink: Send + 'static {
    /// Read-only view of the mirror.
    type View: Send + Sync + 'static;

    /// Builds the mirror from the subscription snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the snapshot has the wrong shape.
    fn build(self, graph: &LocalGraph, snapshot: Value) -> Result<Mirror<Self::View>, SinkError>;
}

/// Mirror of a whole-value stream; see [`ValueSink`].
pub struct ValueView<T> {
    node: Arc<InputValue<T>>,
}

impl<T: Clone + Send> ValueView<T> {
    /// Current value.
    pub fn get(&self) -> T {
        self.node.value()
    }

    /// Value received in the last client step, if any.
    pub fn last_change(&self) -> Option<T> {
        self.node.last_change()
    }
}

/// Sink for whole-value streams. Every change replaces the value.
pub struct ValueSink<I> {
    iso: Arc<I>,
}

impl<I> ValueSink<I> {
    /// Mirrors a value stream through `iso`.
    pub fn new(iso: I) -> Self {
        Self { iso: Arc::new(iso) }
    }
}

impl<I> Sink for ValueSink<I>
where
    I: Iso + Send + Sync + 'static,
    I::In: Clone + Send + Sync + 'static,
    I::Out: DeserializeOwned,
{
    type View = ValueView<I::In>;

    fn build(self, graph: &LocalGraph, snapshot: Value) -> Result<Mirror<Self::View>, SinkError> {
        let node = graph.input_value(iso::from_wire(&*self.iso, snapshot)?);
        let weak = Arc::downgrade(&node);
        let iso = self.iso;
        Ok(Mirror {
            view: Arc::new(ValueView { node }),
            apply: Box::new(move |change| {
                let Some(node) = weak.upgrade() else {
                    return Ok(false);
                };
                node.set(iso::from_wire(&*iso, change)?);
                Ok(true)
            }),
        })
    }
}

/// Mirror of a weighted-set stream; see [`SetSink`].
pub struct SetView<T: Eq + Hash> {
    node: Arc<InputSet<T>>,
}

impl<T: Clone + Eq + Hash + Send> SetView<T> {
    /// Current contents.
    pub fn snapshot(&self) -> ZSet<T> {
        self.node.snapshot()
    }

    /// Weights received in the last client step, if any.
    pub fn last_change(&self) -> Option<ZSet<T>> {
        self.node.last_change()
    }
}

/// Sink for weighted-set streams (`[[item, weight], ...]`).
pub struct SetSink<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    iso: Arc<ZSetIso<I>>,
}

impl<I> SetSink<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    /// Mirrors a set stream, converting each item with `item`.
    pub fn new(item: I) -> Self {
        Self {
            iso: Arc::new(iso::zset(item)),
        }
    }
}

impl<I> Sink for SetSink<I>
where
    I: Iso + Send + Sync + 'static,
    I::In: Clone + Eq + Hash + Send + Sync + 'static,
    I::Out: DeserializeOwned,
{
    type View = SetView<I::In>;

    fn build(self, graph: &LocalGraph, snapshot: Value) -> Result<Mirror<Self::View>, SinkError> {
        let node = graph.input_set(iso::from_wire(&*self.iso, snapshot)?);
        let weak = Arc::downgrade(&node);
        let iso = self.iso;
        Ok(Mirror {
            view: Arc::new(SetView { node }),
            apply: Box::new(move |change| {
                let Some(node) = weak.upgrade() else {
                    return Ok(false);
                };
                node.push(iso::from_wire(&*iso, change)?);
                Ok(true)
            }),
        })
    }
}

/// Mirror of a weighted-map stream; see [`MapSink`].
pub struct MapView<K: Eq + Hash, V: Eq + Hash> {
    node: Arc<InputMap<K, V>>,
}

impl<K, V> MapView<K, V>
where
    K: Clone + Eq + Hash + Send,
    V: Clone + Eq + Hash + Send,
{
    /// Current rows.
    pub fn snapshot(&self) -> ZMap<K, V> {
        self.node.snapshot()
    }

    /// Rows received in the last client step, if any.
    pub fn last_change(&self) -> Option<ZMap<K, V>> {
        self.node.last_change()
    }
}

/// Sink for weighted-map streams (`[[key, value, weight], ...]`).
pub struct MapSink<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    iso: Arc<ZMapIso<K, V>>,
}

impl<K, V> MapSink<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    /// Mirrors a map stream, converting keys with `key` and values with `value`.
    pub fn new(key: K, value: V) -> Self {
        Self {
            iso: Arc::new(iso::zmap(key, value)),
        }
    }
}

impl<K, V> Sink for MapSink<K, V>
where
    K: Iso + Send + Sync + 'static,
    V: Iso + Send + Sync + 'static,
    K::In: Clone + Eq + Hash + Send + Sync + 'static,
    V::In: Clone + Eq + Hash + Send + Sync + 'static,
    K::Out: DeserializeOwned,
    V::Out: DeserializeOwned,
{
    type View = MapView<K::In, V::In>;

    fn build(self, graph: &LocalGraph, snapshot: Value) -> Result<Mirror<Self::View>, SinkError> {
        let node = graph.input_map(iso::from_wire(&*self.iso, snapshot)?);
        let weak = Arc::downgrade(&node);
        let iso = self.iso;
        Ok(Mirror {
            view: Arc::new(MapView { node }),
            apply: Box::new(move |change| {
                let Some(node) = weak.upgrade() else {
                    return Ok(false);
                };
                node.push(iso::from_wire(&*iso, change)?);
                Ok(true)
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drpc_common::Graph;
    use serde_json::json;

    #[test]
    fn value_sink_replaces_on_change() {
        let graph = LocalGraph::new();
        let mirror = ValueSink::new(iso::id::<String>())
            .build(&graph, json!("draft"))
            .unwrap();
        assert_eq!(mirror.view.get(), "draft");

        assert!((mirror.apply)(json!("final")).unwrap());
        assert_eq!(mirror.view.get(), "draft");
        graph.step();
        assert_eq!(mirror.view.get(), "final");
        assert_eq!(mirror.view.last_change().as_deref(), Some("final"));
    }

    #[test]
    fn set_sink_merges_weights() {
        let graph = LocalGraph::new();
        let mirror = SetSink::new(iso::id::<String>())
            .build(&graph, json!([["a", 1], ["b", 1]]))
            .unwrap();

        (mirror.apply)(json!([["a", -1], ["c", 2]])).unwrap();
        graph.step();

        let set = mirror.view.snapshot();
        assert!(!set.contains(&"a".to_string()));
        assert_eq!(set.weight(&"b".to_string()), 1);
        assert_eq!(set.weight(&"c".to_string()), 2);
    }

    #[test]
    fn map_sink_decodes_rows() {
        let graph = LocalGraph::new();
        let mirror = MapSink::new(iso::id::<String>(), iso::id::<u32>())
            .build(&graph, json!([["ada", 36, 1]]))
            .unwrap();
        let rows = mirror.view.snapshot();
        let ada = "ada".to_string();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(&ada).collect::<Vec<_>>(), vec![(&36, 1)]);
    }

    #[test]
    fn wrong_snapshot_shape_is_an_error() {
        let graph = LocalGraph::new();
        let err = SetSink::new(iso::id::<String>()).build(&graph, json!({"a": 1}));
        assert!(matches!(err, Err(SinkError::Decode(_))));
    }

    #[test]
    fn applier_reports_dropped_mirror() {
        let graph = LocalGraph::new();
        let Mirror { view, apply } = SetSink::new(iso::id::<u64>())
            .build(&graph, json!([]))
            .unwrap();
        drop(view);
        assert!(!apply(json!([[1, 1]])).unwrap());
        graph.step();
        assert_eq!(graph.node_count(), 0);
    }
}
