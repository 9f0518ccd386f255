//! Composable bidirectional converters between internal values and their
//! wire-safe representation.
//!
//! An [`Iso`] pairs `to: In -> Out` with `from: Out -> In`. Converters are
//! stateless values; combinators build larger converters from smaller ones
//! and every combinator preserves the round-trip law
//! `from(to(x)) == x` when its parts satisfy it.
//!
//! ```
//! use drpc_common::iso::{self, Iso};
//!
//! let cents = iso::from_fns(|d: u64| d * 100, |c: u64| c / 100);
//! let list = iso::array(cents);
//! assert_eq!(list.to(vec![1, 2]), vec![100, 200]);
//! assert_eq!(list.from(vec![300]), vec![3]);
//! ```

use crate::collection::{ZMap, ZSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::marker::PhantomData;
use thiserror::Error;

/// A pair of mutually inverse conversions.
pub trait Iso {
    /// Internal representation.
    type In;
    /// External (wire-side) representation.
    type Out;

    /// Converts towards the wire.
    fn to(&self, value: Self::In) -> Self::Out;

    /// Converts back from the wire.
    fn from(&self, value: Self::Out) -> Self::In;
}

impl<I: Iso + ?Sized> Iso for Box<I> {
    type In = I::In;
    type Out = I::Out;

    fn to(&self, value: Self::In) -> Self::Out {
        (**self).to(value)
    }

    fn from(&self, value: Self::Out) -> Self::In {
        (**self).from(value)
    }
}

/// Errors raised when a wire value cannot be brought back into its
/// internal form.
#[derive(Debug, Error)]
pub enum IsoError {
    /// The JSON value did not match the converter's wire type.
    #[error("wire value does not match converter: {0}")]
    Decode(#[source] serde_json::Error),
    /// The converter's wire type could not be serialized to JSON.
    #[error("converter output is not serializable: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Runs `iso.to` and serializes the result to a JSON value.
///
/// # Errors
///
/// Returns [`IsoError::Encode`] if the wire type fails to serialize.
pub fn to_wire<I>(iso: &I, value: I::In) -> Result<Value, IsoError>
where
    I: Iso + ?Sized,
    I::Out: Serialize,
{
    serde_json::to_value(iso.to(value)).map_err(IsoError::Encode)
}

/// Deserializes a JSON value into the wire type and runs `iso.from`.
///
/// # Errors
///
/// Returns [`IsoError::Decode`] if the value has the wrong shape.
pub fn from_wire<I>(iso: &I, value: Value) -> Result<I::In, IsoError>
where
    I: Iso + ?Sized,
    I::Out: DeserializeOwned,
{
    let wire = serde_json::from_value(value).map_err(IsoError::Decode)?;
    Ok(iso.from(wire))
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Identity converter; see [`id`].
pub struct Identity<T>(PhantomData<fn(T) -> T>);

impl<T> Iso for Identity<T> {
    type In = T;
    type Out = T;

    fn to(&self, value: T) -> T {
        value
    }

    fn from(&self, value: T) -> T {
        value
    }
}

/// Converter that leaves values unchanged.
#[must_use]
pub fn id<T>() -> Identity<T> {
    Identity(PhantomData)
}

/// Converter built from two closures; see [`from_fns`].
pub struct FnIso<A, B, F, G> {
    to: F,
    from: G,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B, F, G> Iso for FnIso<A, B, F, G>
where
    F: Fn(A) -> B,
    G: Fn(B) -> A,
{
    type In = A;
    type Out = B;

    fn to(&self, value: A) -> B {
        (self.to)(value)
    }

    fn from(&self, value: B) -> A {
        (self.from)(value)
    }
}

/// Builds a converter from a forward and a backward function.
///
/// The caller is responsible for the two functions being inverses.
pub fn from_fns<A, B, F, G>(to: F, from: G) -> FnIso<A, B, F, G>
where
    F: Fn(A) -> B,
    G: Fn(B) -> A,
{
    FnIso {
        to,
        from,
        _marker: PhantomData,
    }
}

// ---------------------------------------------------------------------------
// Structural combinators
// ---------------------------------------------------------------------------

/// Inverted converter; see [`flip`].
pub struct Flip<I>(I);

impl<I: Iso> Iso for Flip<I> {
    type In = I::Out;
    type Out = I::In;

    fn to(&self, value: I::Out) -> I::In {
        self.0.from(value)
    }

    fn from(&self, value: I::In) -> I::Out {
        self.0.to(value)
    }
}

/// Swaps the direction of a converter.
pub fn flip<I: Iso>(iso: I) -> Flip<I> {
    Flip(iso)
}

/// Sequential chaining; see [`compose`].
pub struct Compose<F, G>(F, G);

impl<F, G> Iso for Compose<F, G>
where
    F: Iso,
    G: Iso<In = F::Out>,
{
    type In = F::In;
    type Out = G::Out;

    fn to(&self, value: F::In) -> G::Out {
        self.1.to(self.0.to(value))
    }

    fn from(&self, value: G::Out) -> F::In {
        self.0.from(self.1.from(value))
    }
}

/// Chains `first` then `second` towards the wire, and the reverse back.
pub fn compose<F, G>(first: F, second: G) -> Compose<F, G>
where
    F: Iso,
    G: Iso<In = F::Out>,
{
    Compose(first, second)
}

/// Element-wise list conversion; see [`array`].
pub struct Array<I>(I);

impl<I: Iso> Iso for Array<I> {
    type In = Vec<I::In>;
    type Out = Vec<I::Out>;

    fn to(&self, value: Self::In) -> Self::Out {
        value.into_iter().map(|v| self.0.to(v)).collect()
    }

    fn from(&self, value: Self::Out) -> Self::In {
        value.into_iter().map(|v| self.0.from(v)).collect()
    }
}

/// Applies `item` to every element of a list.
pub fn array<I: Iso>(item: I) -> Array<I> {
    Array(item)
}

macro_rules! tuple_iso {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Iso),+> Iso for ($($name,)+) {
            type In = ($($name::In,)+);
            type Out = ($($name::Out,)+);

            fn to(&self, value: Self::In) -> Self::Out {
                ($(self.$idx.to(value.$idx),)+)
            }

            fn from(&self, value: Self::Out) -> Self::In {
                ($(self.$idx.from(value.$idx),)+)
            }
        }
    };
}

tuple_iso!(A: 0, B: 1);
tuple_iso!(A: 0, B: 1, C: 2);
tuple_iso!(A: 0, B: 1, C: 2, D: 3);

/// Position-wise conversion of a pair. Tuples of up to four converters are
/// converters themselves; this is a named entry point for the common case.
pub fn tuple<A: Iso, B: Iso>(first: A, second: B) -> (A, B) {
    (first, second)
}

/// Value-wise conversion of a string-keyed record; see [`record`].
pub struct Record<I>(I);

impl<I: Iso> Iso for Record<I> {
    type In = BTreeMap<String, I::In>;
    type Out = BTreeMap<String, I::Out>;

    fn to(&self, value: Self::In) -> Self::Out {
        value.into_iter().map(|(k, v)| (k, self.0.to(v))).collect()
    }

    fn from(&self, value: Self::Out) -> Self::In {
        value.into_iter().map(|(k, v)| (k, self.0.from(v))).collect()
    }
}

/// Applies one converter to every value of a string-keyed record.
pub fn record<I: Iso>(value: I) -> Record<I> {
    Record(value)
}

/// Boxed converter over raw JSON values, used for per-field conversion.
pub type JsonIso = Box<dyn Iso<In = Value, Out = Value> + Send + Sync>;

/// Per-field conversion of a JSON object; see [`object`].
pub struct Object {
    fields: BTreeMap<String, JsonIso>,
}

impl Object {
    fn convert(
        &self,
        value: Value,
        apply: impl Fn(&JsonIso, Value) -> Value,
    ) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, field)| match self.fields.get(&key) {
                        Some(iso) => {
                            let converted = apply(iso, field);
                            (key, converted)
                        }
                        None => (key, field),
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

impl Iso for Object {
    type In = Value;
    type Out = Value;

    fn to(&self, value: Value) -> Value {
        self.convert(value, |iso, v| iso.to(v))
    }

    fn from(&self, value: Value) -> Value {
        self.convert(value, |iso, v| iso.from(v))
    }
}

/// Converts the named fields of a JSON object with their own converters.
///
/// Fields without a converter, and non-object values, pass through.
pub fn object<S: Into<String>>(fields: impl IntoIterator<Item = (S, JsonIso)>) -> Object {
    Object {
        fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Hash map to entry list; see [`map`].
pub struct MapIso<K, V>(K, V);

impl<K, V> Iso for MapIso<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
{
    type In = HashMap<K::In, V::In>;
    type Out = Vec<(K::Out, V::Out)>;

    fn to(&self, value: Self::In) -> Self::Out {
        value
            .into_iter()
            .map(|(k, v)| (self.0.to(k), self.1.to(v)))
            .collect()
    }

    fn from(&self, value: Self::Out) -> Self::In {
        value
            .into_iter()
            .map(|(k, v)| (self.0.from(k), self.1.from(v)))
            .collect()
    }
}

/// Converts a hash map into a `[[key, value], ...]` entry list.
pub fn map<K, V>(key: K, value: V) -> MapIso<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
{
    MapIso(key, value)
}

/// Weighted set to weighted list; see [`zset`].
pub struct ZSetIso<I>(I);

impl<I> Iso for ZSetIso<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    type In = ZSet<I::In>;
    type Out = Vec<(I::Out, i64)>;

    fn to(&self, value: Self::In) -> Self::Out {
        value
            .into_iter()
            .map(|(item, weight)| (self.0.to(item), weight))
            .collect()
    }

    fn from(&self, value: Self::Out) -> Self::In {
        value
            .into_iter()
            .map(|(item, weight)| (self.0.from(item), weight))
            .collect()
    }
}

/// Converts a [`ZSet`] into `[[item, weight], ...]`, preserving weights.
pub fn zset<I>(item: I) -> ZSetIso<I>
where
    I: Iso,
    I::In: Eq + Hash,
{
    ZSetIso(item)
}

/// Weighted map to weighted row list; see [`zmap`].
pub struct ZMapIso<K, V>(K, V);

impl<K, V> Iso for ZMapIso<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    type In = ZMap<K::In, V::In>;
    type Out = Vec<(K::Out, V::Out, i64)>;

    fn to(&self, value: Self::In) -> Self::Out {
        value
            .into_iter()
            .map(|(k, v, w)| (self.0.to(k), self.1.to(v), w))
            .collect()
    }

    fn from(&self, value: Self::Out) -> Self::In {
        value
            .into_iter()
            .map(|(k, v, w)| (self.0.from(k), self.1.from(v), w))
            .collect()
    }
}

/// Converts a [`ZMap`] into `[[key, value, weight], ...]`, preserving
/// weights.
pub fn zmap<K, V>(key: K, value: V) -> ZMapIso<K, V>
where
    K: Iso,
    V: Iso,
    K::In: Eq + Hash,
    V::In: Eq + Hash,
{
    ZMapIso(key, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stringly() -> impl Iso<In = i64, Out = String> {
        from_fns(|n: i64| n.to_string(), |s: String| s.parse().unwrap_or_default())
    }

    fn doubling() -> impl Iso<In = i64, Out = i64> {
        from_fns(|n: i64| n * 2, |n: i64| n / 2)
    }

    #[test]
    fn identity_roundtrip() {
        let iso = id::<String>();
        assert_eq!(iso.from(iso.to("x".into())), "x");
    }

    #[test]
    fn flip_swaps_direction() {
        let iso = flip(stringly());
        assert_eq!(iso.to("42".to_string()), 42);
        assert_eq!(iso.from(7), "7");
    }

    #[test]
    fn compose_applies_in_order() {
        let iso = compose(doubling(), stringly());
        assert_eq!(iso.to(21), "42");
        assert_eq!(iso.from("42".into()), 21);
        for x in [-5, 0, 9, 1_000] {
            assert_eq!(iso.from(iso.to(x)), x);
        }
    }

    #[test]
    fn array_roundtrip() {
        let iso = array(stringly());
        let wire = iso.to(vec![1, 2, 3]);
        assert_eq!(wire, vec!["1", "2", "3"]);
        assert_eq!(iso.from(wire), vec![1, 2, 3]);
    }

    #[test]
    fn tuple_converts_positions() {
        let iso = tuple(stringly(), id::<bool>());
        assert_eq!(iso.to((3, true)), ("3".to_string(), true));
        let triple = (doubling(), stringly(), id::<()>());
        assert_eq!(triple.from(triple.to((1, 2, ()))), (1, 2, ()));
    }

    #[test]
    fn record_roundtrip() {
        let iso = record(stringly());
        let input: BTreeMap<String, i64> = [("a".to_string(), 1)].into_iter().collect();
        let wire = iso.to(input.clone());
        assert_eq!(wire.get("a").map(String::as_str), Some("1"));
        assert_eq!(iso.from(wire), input);
    }

    #[test]
    fn object_converts_named_fields_only() {
        let upper: JsonIso = Box::new(from_fns(
            |v: Value| json!(v.as_str().unwrap_or_default().to_uppercase()),
            |v: Value| json!(v.as_str().unwrap_or_default().to_lowercase()),
        ));
        let iso = object([("name", upper)]);
        let wire = iso.to(json!({"name": "ada", "age": 36}));
        assert_eq!(wire, json!({"name": "ADA", "age": 36}));
        assert_eq!(iso.from(wire), json!({"name": "ada", "age": 36}));
        assert_eq!(iso.to(json!(5)), json!(5));
    }

    #[test]
    fn map_roundtrip() {
        let iso = map(stringly(), id::<bool>());
        let input: HashMap<i64, bool> = [(1, true), (2, false)].into_iter().collect();
        let mut wire = iso.to(input.clone());
        wire.sort();
        assert_eq!(wire, vec![("1".to_string(), true), ("2".to_string(), false)]);
        assert_eq!(iso.from(wire), input);
    }

    #[test]
    fn zset_preserves_weights() {
        let iso = zset(stringly());
        let input: ZSet<i64> = [(1, 2), (5, -1)].into_iter().collect();
        let mut wire = iso.to(input.clone());
        wire.sort();
        assert_eq!(wire, vec![("1".to_string(), 2), ("5".to_string(), -1)]);
        assert_eq!(iso.from(wire), input);
    }

    #[test]
    fn zmap_preserves_weights() {
        let iso = zmap(id::<String>(), doubling());
        let input: ZMap<String, i64> = [("k".to_string(), 4, 3)].into_iter().collect();
        let wire = iso.to(input.clone());
        assert_eq!(wire, vec![("k".to_string(), 8, 3)]);
        assert_eq!(iso.from(wire), input);
    }

    #[test]
    fn wire_helpers() {
        let iso = zset(id::<String>());
        let set: ZSet<String> = [("a".to_string(), 1)].into_iter().collect();
        let value = to_wire(&iso, set.clone()).unwrap();
        assert_eq!(value, json!([["a", 1]]));
        assert_eq!(from_wire(&iso, value).unwrap(), set);
        assert!(matches!(
            from_wire(&iso, json!({"a": 1})),
            Err(IsoError::Decode(_))
        ));
    }
}
