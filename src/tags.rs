//! Span tags.
//!
//! A tag store maps dotted-path keys (`aws.lambda.request_id`) to scalar
//! values or homogeneous arrays of scalars. Keys follow the same grammar as
//! span names. The store keeps insertion order so debug serialization is
//! deterministic; re-setting an existing key replaces its value in place
//! (last write wins) without changing its position.

use crate::error::{TraceError, TraceResult};
use crate::name;

/// Array of homogeneous tag values.
#[derive(Clone, Debug, PartialEq)]
pub enum TagArray {
    /// Array of bools
    Bool(Vec<bool>),
    /// Array of integers
    I64(Vec<i64>),
    /// Array of floats
    F64(Vec<f64>),
    /// Array of strings
    Str(Vec<String>),
}

impl TagArray {
    fn validate(&self, key: &str) -> TraceResult<()> {
        if let TagArray::F64(values) = self {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(TraceError::InvalidTagValue {
                    key: key.to_owned(),
                    reason: "number must be finite",
                });
            }
        }
        Ok(())
    }
}

/// Value of a span tag.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// bool values
    Bool(bool),
    /// i64 values
    I64(i64),
    /// f64 values
    F64(f64),
    /// String values
    Str(String),
    /// Array of homogeneous values
    Array(TagArray),
}

impl TagValue {
    /// String slice if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn validate(&self, key: &str) -> TraceResult<()> {
        match self {
            TagValue::F64(v) if !v.is_finite() => Err(TraceError::InvalidTagValue {
                key: key.to_owned(),
                reason: "number must be finite",
            }),
            TagValue::Array(array) => array.validate(key),
            _ => Ok(()),
        }
    }
}

macro_rules! from_values {
    ($(($t:ty, $variant:expr);)*) => {
        $(
            impl From<$t> for TagValue {
                fn from(value: $t) -> Self {
                    $variant(value)
                }
            }
        )*
    };
}

from_values!(
    (bool, TagValue::Bool);
    (i64, TagValue::I64);
    (f64, TagValue::F64);
    (String, TagValue::Str);
);

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::I64(value.into())
    }
}

impl From<u32> for TagValue {
    fn from(value: u32) -> Self {
        TagValue::I64(value.into())
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_owned())
    }
}

macro_rules! from_value_arrays {
    ($(($t:ty, $variant:expr);)*) => {
        $(
            impl From<Vec<$t>> for TagValue {
                fn from(values: Vec<$t>) -> Self {
                    TagValue::Array($variant(values))
                }
            }
        )*
    };
}

from_value_arrays!(
    (bool, TagArray::Bool);
    (i64, TagArray::I64);
    (f64, TagArray::F64);
    (String, TagArray::Str);
);

impl From<Vec<&str>> for TagValue {
    fn from(values: Vec<&str>) -> Self {
        TagValue::Array(TagArray::Str(values.into_iter().map(Into::into).collect()))
    }
}

/// Ordered store of validated tags, owned one-per-span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tags(Vec<(String, TagValue)>);

impl Tags {
    /// Creates an empty store.
    pub fn new() -> Self {
        Tags::default()
    }

    /// Sets a single tag; replaces the value in place if the key exists.
    pub fn set(&mut self, key: &str, value: impl Into<TagValue>) -> TraceResult<()> {
        let key = name::ensure_tag_name(key)?;
        let value = value.into();
        value.validate(key)?;
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key.to_owned(), value)),
        }
        Ok(())
    }

    /// Sets every tag from `entries`. Stops at the first invalid entry;
    /// entries before it are kept.
    pub fn set_many<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> TraceResult<()>
    where
        K: AsRef<str>,
        V: Into<TagValue>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Looks up a tag value by key.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
