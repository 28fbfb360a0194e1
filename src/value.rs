//! Typed in-memory values, container keys, and plain records.
//!
//! Raw input arrives in the plain forms (`Record`, `Items`, scalars);
//! loading turns it into typed instances (`Map`, `List`). JSON trees
//! convert losslessly into the plain forms.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::types::collection::TypedList;
use crate::types::container::StructuredMap;

/// A key of a keyed container. Restricted to hashable scalar shapes so
/// generic maps can be keyed by more than strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Key {
    Str(String),
    Int(i64),
    Bool(bool),
    Uuid(Uuid),
}

impl Key {
    /// The declared-field name this key addresses, when string-shaped.
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts an already-loaded value into a key, rejecting shapes that
    /// cannot serve as one.
    pub fn try_from_value(value: Value, context: &Context) -> Result<Key> {
        match value {
            Value::Str(s) => Ok(Key::Str(s)),
            Value::Int(i) => Ok(Key::Int(i)),
            Value::Bool(b) => Ok(Key::Bool(b)),
            Value::Uuid(u) => Ok(Key::Uuid(u)),
            other => Err(Error::incompatible(context, other.kind_name(), "key")),
        }
    }

    /// Renders the key for a JSON object, where keys must be text.
    pub fn dump_string(&self) -> String {
        match self {
            Key::Str(s) => s.clone(),
            Key::Int(i) => i.to_string(),
            Key::Bool(b) => b.to_string(),
            Key::Uuid(u) => u.to_string(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{}", s),
            Key::Int(i) => write!(f, "{}", i),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// A plain, untyped keyed record: the shape raw map input arrives in and
/// the storage of container instances.
pub type Record = IndexMap<Key, Value>;

/// A typed or plain in-memory value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    /// Plain keyed record, not yet bound to a schema.
    Record(Record),
    /// Plain ordered sequence, not yet bound to a member type.
    Items(Vec<Value>),
    /// A typed container instance.
    Map(StructuredMap),
    /// A typed collection instance.
    List(TypedList),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of this value's shape, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Uuid(_) => "uuid",
            Value::Record(_) => "record",
            Value::Items(_) => "sequence",
            Value::Map(_) => "structured map",
            Value::List(_) => "collection",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&StructuredMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TypedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Dumps a plain (non-instance) value to JSON. Instance variants are
    /// handled by their own dump paths, which carry the traversal guard.
    pub(crate) fn plain_to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Record(r) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in r {
                    obj.insert(k.dump_string(), v.plain_to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Items(items) => {
                serde_json::Value::Array(items.iter().map(Value::plain_to_json).collect())
            }
            // Reached only through untyped storage; cycle-guarded dumps
            // go through AttrType::dump instead.
            Value::Map(_) | Value::List(_) => serde_json::Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Items(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut record = Record::new();
                for (k, v) in obj {
                    record.insert(Key::Str(k), Value::from(v));
                }
                Value::Record(record)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Str(s) => Value::Str(s),
            Key::Int(i) => Value::Int(i),
            Key::Bool(b) => Value::Bool(b),
            Key::Uuid(u) => Value::Uuid(u),
        }
    }
}

impl From<StructuredMap> for Value {
    fn from(m: StructuredMap) -> Self {
        Value::Map(m)
    }
}

impl From<TypedList> for Value {
    fn from(l: TypedList) -> Self {
        Value::List(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object_becomes_record() {
        let v = Value::from(json!({"name": "Alice", "age": 30}));
        let Value::Record(record) = v else {
            panic!("expected record");
        };
        assert_eq!(record.get(&Key::from("name")), Some(&Value::from("Alice")));
        assert_eq!(record.get(&Key::from("age")), Some(&Value::Int(30)));
    }

    #[test]
    fn test_json_array_becomes_items() {
        let v = Value::from(json!([1, "two", true]));
        assert_eq!(
            v,
            Value::Items(vec![Value::Int(1), Value::from("two"), Value::Bool(true)])
        );
    }

    #[test]
    fn test_json_numbers_split_int_and_float() {
        assert_eq!(Value::from(json!(7)), Value::Int(7));
        assert_eq!(Value::from(json!(7.5)), Value::Float(7.5));
    }

    #[test]
    fn test_key_rejects_non_key_shapes() {
        let err = Key::try_from_value(Value::Float(1.5), &Context::root()).unwrap_err();
        assert!(err.to_string().contains("float"));
    }

    #[test]
    fn test_plain_record_round_trips_to_json() {
        let v = Value::from(json!({"a": 1, "b": [true, null]}));
        assert_eq!(v.plain_to_json(), json!({"a": 1, "b": [true, null]}));
    }

    #[test]
    fn test_key_dump_string() {
        assert_eq!(Key::from("id").dump_string(), "id");
        assert_eq!(Key::Int(42).dump_string(), "42");
    }
}
