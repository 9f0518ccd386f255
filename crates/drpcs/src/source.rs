//! Stream handles backed by reactive graph values.
//!
//! Each source reads a reactive collaborator and converts its snapshot and
//! last change to JSON through an [`Iso`].

use crate::endpoint::StreamHandle;
use drpc_common::graph::{ReactiveMap, ReactiveSet, ReactiveValue};
use drpc_common::iso::{self, Iso, ZMapIso, ZSetIso};
use serde::Serialize;
use serde_json::Value;
use std::hash::Hash;
use std::sync::Arc;

/// Whole-value stream: snapshot and change are both the converted value.
pub struct ValueSource<I: Iso> {
    value: Arc<dyn ReactiveValue<I::In>>,
    iso: I,
}

impl<I: Iso> ValueSource<I> {
    /// Streams `value` through `iso`.
    pub fn new(value: Arc<dyn ReactiveValue<I::In>>, iso: I) -> Self {
        Self { value, iso }
    }
}

impl<I> StreamHandle for ValueSource<I>
where
    I: Iso + Send + Sync,
    I::Out: Serialize,
{
    fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(iso::to_wire(&self.iso, self.value.value())?)
    }

    fn last_change(&self) -> anyhow::Result<Option<Value>> {
        match self.value.last_change() {
            Some(value) => Ok(Some(iso::to_wire(&self.iso, value)?)),
            None => Ok(None),
        }
    }
}

/// Weighted-set stream on the wire as `[[item, weight], ...]`.
pub struct SetSource<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    set: Arc<dyn ReactiveSet<I::In>>,
    iso: ZSetIso<I>,
}

impl<I> SetSource<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    /// Streams `set`, converting each item with `item`.
    pub fn new(set: Arc<dyn ReactiveSet<I::In>>, item: I) -> Self {
        Self {
            set,
            iso: iso::zset(item),
        }
    }
}

impl<I> StreamHandle for SetSource<I>
where
    I: Iso + Send + Sync,
    I::In: Eq + Hash,
    I::Out: Serialize,
{
    fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(iso::to_wire(&self.iso, self.set.snapshot())?)
    }

    fn last_change(&self) -> anyhow::Result<Option<Value>> {
        match self.set.last_change() {
            Some(change) if !change.is_empty() => Ok(Some(iso::to_wire(&self.iso, change)?)),
            _ => Ok(None),
        }
    }
}

/// Weighted-map stream on the wire as `[[key, value, weight], ...]`.
pub struct MapSource<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    map: Arc<dyn ReactiveMap<K::In, V::In>>,
    iso: ZMapIso<K, V>,
}

impl<K, V> MapSource<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    /// Streams `map`, converting keys with `key` and values with `value`.
    pub fn new(map: Arc<dyn ReactiveMap<K::In, V::In>>, key: K, value: V) -> Self {
        Self {
            map,
            iso: iso::zmap(key, value),
        }
    }
}

impl<K, V> StreamHandle for MapSource<K, V>
where
    K: Iso + Send + Sync,
    V: Iso + Send + Sync,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
    K::Out: Serialize,
    V::Out: Serialize,
{
    fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(iso::to_wire(&self.iso, self.map.snapshot())?)
    }

    fn last_change(&self) -> anyhow::Result<Option<Value>> {
        match self.map.last_change() {
            Some(change) if !change.is_empty() => Ok(Some(iso::to_wire(&self.iso, change)?)),
            _ => Ok(None),
        }
    }
}
