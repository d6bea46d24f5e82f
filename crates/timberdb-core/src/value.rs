//! Tagged document value type.
//!
//! Documents are trees of [`Value`] variants with explicit constructors for
//! each shape. All update/filter operator logic dispatches on the variant;
//! conversion to and from `serde_json::Value` happens only at the API edge.
//! Integers and floats are distinct variants so that numeric identity
//! survives log replay.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TimberError, TimberResult};

/// A single document field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent/null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered array of values.
    Array(Vec<Value>),
    /// Nested document.
    Object(Document),
}

impl Value {
    /// Constructs a string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Constructs an integer value.
    #[must_use]
    pub const fn int(v: i64) -> Self {
        Self::Int(v)
    }

    /// Constructs a float value.
    #[must_use]
    pub const fn float(v: f64) -> Self {
        Self::Float(v)
    }

    /// Constructs a byte-string value.
    #[must_use]
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(b.into())
    }

    /// Constructs an array value.
    #[must_use]
    pub fn array(items: impl Into<Vec<Value>>) -> Self {
        Self::Array(items.into())
    }

    /// Constructs an object value.
    #[must_use]
    pub fn object(doc: Document) -> Self {
        Self::Object(doc)
    }

    /// Returns the nested document when this value is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Self::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns the string slice when this value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// `true` when this value is a scalar usable as a document identity.
    #[must_use]
    pub const fn is_identity_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::String(_)
        )
    }

    /// Stringified identity for `_id` values; `None` for non-scalar shapes.
    #[must_use]
    pub fn id_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Bool(v) => Some(v.to_string()),
            _ => None,
        }
    }

    /// Natural ordering used by range filters.
    ///
    /// Numbers compare across the `Int`/`Float` divide; strings and booleans
    /// compare within their own type. Values of incomparable types return
    /// `None`, which range predicates treat as "no match".
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality as filters see it: numeric equality crosses the int/float
    /// divide, everything else is structural.
    #[must_use]
    pub fn matches_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.compare(other) == Some(Ordering::Equal)
            }
            _ => self == other,
        }
    }

    /// Adds a numeric delta to a numeric value.
    ///
    /// Integer plus integer stays integer; any float operand widens the
    /// result to float. Returns `None` when either side is not numeric.
    #[must_use]
    pub fn numeric_add(&self, delta: &Value) -> Option<Value> {
        match (self, delta) {
            (Self::Int(a), Self::Int(b)) => Some(match a.checked_add(*b) {
                Some(sum) => Self::Int(sum),
                None => Self::Float(*a as f64 + *b as f64),
            }),
            (Self::Int(a), Self::Float(b)) => Some(Self::Float(*a as f64 + b)),
            (Self::Float(a), Self::Int(b)) => Some(Self::Float(a + *b as f64)),
            (Self::Float(a), Self::Float(b)) => Some(Self::Float(a + b)),
            _ => None,
        }
    }

    /// Converts to a `serde_json::Value` for API-edge consumers.
    ///
    /// Bytes are rendered as an array of integers since JSON has no binary
    /// shape; the native representation is lossless.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect())
            }
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Object(doc) => doc.to_json(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Object(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    // Larger than i64: fall back to float rather than reject.
                    Self::Float(u as f64)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Self::Object(Document::from_map(map)),
        }
    }
}

/// An ordered map of field name to [`Value`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a JSON object into a document.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the JSON value is not an object.
    pub fn from_json(value: serde_json::Value) -> TimberResult<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(TimberError::validation(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }

    /// Renders the document as a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` when the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// `true` when a top-level field exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Inserts a top-level field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Field names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Resolves a dotted path through nested objects.
    ///
    /// Arrays are not path-indexed; a path segment landing on a non-object
    /// resolves to `None`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = current.fields.get(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            current = value.as_object()?;
        }
        None
    }

    /// Sets a value at a dotted path, creating intermediate objects.
    ///
    /// An intermediate segment holding a non-object value is replaced by a
    /// fresh object so the assignment always succeeds.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut current = &mut self.fields;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_owned(), value);
                return;
            }
            let entry = current
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(Document::new()));
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::Object(Document::new());
            }
            match entry {
                Value::Object(doc) => current = &mut doc.fields,
                _ => unreachable!("entry was just normalized to an object"),
            }
        }
    }

    /// Removes the value at a dotted path; absent paths are a no-op.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => self.fields.remove(path),
            Some((head, rest)) => match self.fields.get_mut(head) {
                Some(Value::Object(doc)) => doc.remove_path(rest),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        Document::from_json(v).unwrap()
    }

    #[test]
    fn test_json_round_trip_preserves_numbers() {
        let d = doc(json!({"age": 30, "score": 1.5, "name": "Alice"}));
        assert_eq!(d.get("age"), Some(&Value::Int(30)));
        assert_eq!(d.get("score"), Some(&Value::Float(1.5)));
        assert_eq!(d.to_json(), json!({"age": 30, "name": "Alice", "score": 1.5}));
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"address": {"city": "NY", "geo": {"lat": 1}}}));
        assert_eq!(d.get_path("address.city"), Some(&Value::string("NY")));
        assert_eq!(d.get_path("address.geo.lat"), Some(&Value::Int(1)));
        assert_eq!(d.get_path("address.zip"), None);
        assert_eq!(d.get_path("address.city.inner"), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut d = Document::new();
        d.set_path("a.b.c", Value::Int(1));
        assert_eq!(d.get_path("a.b.c"), Some(&Value::Int(1)));

        // A scalar in the middle of the path is replaced by an object.
        d.set_path("a.b", Value::Int(7));
        d.set_path("a.b.d", Value::Int(2));
        assert_eq!(d.get_path("a.b.d"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_remove_path() {
        let mut d = doc(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(d.remove_path("a.b"), Some(Value::Int(1)));
        assert_eq!(d.remove_path("a.b"), None);
        assert_eq!(d.get_path("a.c"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_compare_natural_ordering() {
        use std::cmp::Ordering::*;
        assert_eq!(Value::Int(2).compare(&Value::Int(3)), Some(Less));
        assert_eq!(Value::Int(2).compare(&Value::Float(2.0)), Some(Equal));
        assert_eq!(
            Value::string("b").compare(&Value::string("a")),
            Some(Greater)
        );
        assert_eq!(Value::Int(1).compare(&Value::string("1")), None);
    }

    #[test]
    fn test_numeric_add_widening() {
        assert_eq!(
            Value::Int(30).numeric_add(&Value::Int(1)),
            Some(Value::Int(31))
        );
        assert_eq!(
            Value::Int(30).numeric_add(&Value::Float(0.5)),
            Some(Value::Float(30.5))
        );
        assert_eq!(Value::string("x").numeric_add(&Value::Int(1)), None);
    }

    #[test]
    fn test_id_string() {
        assert_eq!(Value::string("u1").id_string(), Some("u1".to_owned()));
        assert_eq!(Value::Int(42).id_string(), Some("42".to_owned()));
        assert_eq!(Value::Array(vec![]).id_string(), None);
    }

    #[test]
    fn test_bytes_round_trip_bincode() {
        let original = Value::bytes(vec![0u8, 1, 2, 255]);
        let encoded = bincode::serialize(&original).unwrap();
        let decoded: Value = bincode::deserialize(&encoded).unwrap();
        assert_eq!(original, decoded);
    }
}
