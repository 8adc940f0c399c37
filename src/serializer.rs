//! Pluggable (de)serialization and comparison, standing in for the
//! enclosing B+Tree's `key_serializer` / `value_serializer` / `comparator`
//! fields (spec §6, tree context).

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Serializes a key to bytes for the on-disk `ALL_STRINGS` / `ALL_OTHER`
/// key forms, and optionally reports an integer projection so the codec
/// can pick the `ALL_INTEGERS` / `ALL_LONGS` fast paths.
pub trait KeySerializer<K> {
    fn serialize(&self, key: &K) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<K>;

    /// If every key in a page can be represented as an `i64` without loss,
    /// the codec prefers the much cheaper delta-of-integers encoding.
    /// Default: no such projection (forces `ALL_STRINGS`/`ALL_OTHER`).
    fn as_i64(&self, _key: &K) -> Option<i64> {
        None
    }
    fn from_i64(&self, _value: i64) -> Option<K> {
        None
    }

    /// `true` selects the dedicated `ALL_STRINGS` key form (raw UTF-8 bytes
    /// through leading-value pack) over the generic `ALL_OTHER` form.
    /// Default: no, this is not a native string key.
    fn is_string(&self) -> bool {
        false
    }

    /// `true` marks the tree-wide "default object serializer" (no custom
    /// key serializer was supplied). The `ALL_OTHER` key form writes such
    /// keys back-to-back, since generic serialized objects rarely share a
    /// useful byte prefix; a custom serializer's bytes go through
    /// leading-value pack instead, on the chance they were designed to.
    /// Default: no, this is a custom serializer.
    fn is_default_serializer(&self) -> bool {
        false
    }
}

pub trait ValueSerializer<V> {
    fn serialize(&self, value: &V) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<V>;
}

/// The "default object serializer" the record manager contract names in
/// §6: a generic, serde-backed codec used whenever the tree was built
/// without a custom key/value serializer.
pub struct DefaultSerializer<T> {
    _marker: PhantomData<T>,
}

impl<T> Default for DefaultSerializer<T> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> KeySerializer<T> for DefaultSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, key: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(key).map_err(|e| Error::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialize(e.to_string()))
    }

    fn is_default_serializer(&self) -> bool {
        true
    }
}

impl<T> ValueSerializer<T> for DefaultSerializer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialize(e.to_string()))
    }
}

/// Integer-native serializers get the `ALL_INTEGERS`/`ALL_LONGS` fast path
/// for free by reporting their own value as the `i64` projection.
macro_rules! impl_integer_key_serializer {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl KeySerializer<$ty> for DefaultSerializer<$ty> {
                fn serialize(&self, key: &$ty) -> Result<Vec<u8>> {
                    Ok(key.to_be_bytes().to_vec())
                }
                fn deserialize(&self, bytes: &[u8]) -> Result<$ty> {
                    let arr: [u8; std::mem::size_of::<$ty>()] = bytes
                        .try_into()
                        .map_err(|_| Error::Format(concat!("bad ", stringify!($ty), " key").into()))?;
                    Ok(<$ty>::from_be_bytes(arr))
                }
                fn as_i64(&self, key: &$ty) -> Option<i64> {
                    Some(*key as i64)
                }
                fn from_i64(&self, value: i64) -> Option<$ty> {
                    <$ty>::try_from(value).ok()
                }
            }
        )+
    };
}

impl_integer_key_serializer!(i32, i64, u32);

/// Native `String` key serializer: raw UTF-8 bytes, no JSON quoting, and
/// flagged so the page codec picks the dedicated `ALL_STRINGS` key form.
#[derive(Default)]
pub struct StringKeySerializer;

impl KeySerializer<String> for StringKeySerializer {
    fn serialize(&self, key: &String) -> Result<Vec<u8>> {
        Ok(key.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Format(e.to_string()))
    }

    fn is_string(&self) -> bool {
        true
    }
}

/// Tree-wide key comparator. `None` (the default) means "natural `Ord`
/// order", matching the nullable comparator field in the tree context.
pub trait Comparator<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}
