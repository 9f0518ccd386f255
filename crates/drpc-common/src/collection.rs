//! Weighted collections used as the internal form of set- and map-valued
//! streams.
//!
//! A weight is the multiplicity of an element. Changes are expressed as
//! collections of the same kind whose weights are added to the current
//! state; an element whose summed weight reaches zero disappears.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

fn add_weight<T: Eq + Hash>(weights: &mut HashMap<T, i64>, item: T, weight: i64) {
    match weights.entry(item) {
        Entry::Occupied(mut entry) => {
            *entry.get_mut() += weight;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(weight);
        }
    }
}

/// Weighted set: item to non-zero integer weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZSet<T: Eq + Hash> {
    weights: HashMap<T, i64>,
}

impl<T: Eq + Hash> Default for ZSet<T> {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash> ZSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to `item`, removing it when the sum becomes zero.
    pub fn add(&mut self, item: T, weight: i64) {
        if weight == 0 {
            return;
        }
        add_weight(&mut self.weights, item, weight);
    }

    /// Shorthand for `add(item, 1)`.
    pub fn insert(&mut self, item: T) {
        self.add(item, 1);
    }

    /// Shorthand for `add(item, -1)`.
    pub fn remove(&mut self, item: T) {
        self.add(item, -1);
    }

    /// Current weight of `item`, zero if absent.
    #[must_use]
    pub fn weight(&self, item: &T) -> i64 {
        self.weights.get(item).copied().unwrap_or(0)
    }

    /// Whether `item` has a non-zero weight.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.weights.contains_key(item)
    }

    /// Iterates `(item, weight)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, i64)> {
        self.weights.iter().map(|(item, w)| (item, *w))
    }

    /// Number of distinct items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns `true` if the set holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Adds every weight of `other` into `self`.
    pub fn merge(&mut self, other: ZSet<T>) {
        for (item, weight) in other.weights {
            self.add(item, weight);
        }
    }
}

impl<T: Eq + Hash> FromIterator<(T, i64)> for ZSet<T> {
    fn from_iter<I: IntoIterator<Item = (T, i64)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (item, weight) in iter {
            set.add(item, weight);
        }
        set
    }
}

impl<T: Eq + Hash> IntoIterator for ZSet<T> {
    type Item = (T, i64);
    type IntoIter = std::collections::hash_map::IntoIter<T, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.weights.into_iter()
    }
}

/// Weighted map: `(key, value)` pair to non-zero integer weight.
///
/// A key may carry several values at once, mirroring a multiset of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZMap<K: Eq + Hash, V: Eq + Hash> {
    weights: HashMap<(K, V), i64>,
}

impl<K: Eq + Hash, V: Eq + Hash> Default for ZMap<K, V> {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Eq + Hash> ZMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to the `(key, value)` row.
    pub fn add(&mut self, key: K, value: V, weight: i64) {
        if weight == 0 {
            return;
        }
        add_weight(&mut self.weights, (key, value), weight);
    }

    /// Values currently held under `key` with their weights.
    pub fn get<'a>(&'a self, key: &'a K) -> impl Iterator<Item = (&'a V, i64)> + 'a {
        self.weights
            .iter()
            .filter(move |((k, _), _)| k == key)
            .map(|((_, v), w)| (v, *w))
    }

    /// Iterates `(key, value, weight)` rows in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, i64)> {
        self.weights.iter().map(|((k, v), w)| (k, v, *w))
    }

    /// Number of distinct rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns `true` if the map holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Adds every row of `other` into `self`.
    pub fn merge(&mut self, other: ZMap<K, V>) {
        for ((key, value), weight) in other.weights {
            self.add(key, value, weight);
        }
    }
}

impl<K: Eq + Hash, V: Eq + Hash> FromIterator<(K, V, i64)> for ZMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V, i64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value, weight) in iter {
            map.add(key, value, weight);
        }
        map
    }
}

impl<K: Eq + Hash, V: Eq + Hash> IntoIterator for ZMap<K, V> {
    type Item = (K, V, i64);
    type IntoIter = std::iter::Map<
        std::collections::hash_map::IntoIter<(K, V), i64>,
        fn(((K, V), i64)) -> (K, V, i64),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.weights
            .into_iter()
            .map((|((k, v), w)| (k, v, w)) as fn(((K, V), i64)) -> (K, V, i64))
    }
}
