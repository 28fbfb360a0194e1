//! Leaf scalar kinds.
//!
//! Scalars carry no schema of their own; they exist to give the engine a
//! complete set of leaf types honoring the same load/validate/dump/example
//! contract the containers do. Coercion on load is deliberate and narrow:
//! numeric text parses into numbers, RFC 3339 text into datetimes,
//! canonical text into UUIDs. Anything structural is incompatible.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::context::Context;
use crate::errors::{Error, Result};
use crate::value::Value;

/// Words examples draw from.
const EXAMPLE_WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
];

/// Upper bound for numeric examples.
const EXAMPLE_NUMERIC_RANGE: i64 = 1000;

/// The closed set of leaf scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Integer,
    Boolean,
    Float,
    DateTime,
    Uuid,
}

impl ScalarKind {
    /// Type name used in diagnostics and descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Integer => "Integer",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::Float => "Float",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Uuid => "Uuid",
        }
    }

    /// Family grouping reported by `describe`.
    pub fn family(&self) -> &'static str {
        match self {
            ScalarKind::String | ScalarKind::Uuid => "string",
            ScalarKind::Integer | ScalarKind::Float => "numeric",
            ScalarKind::Boolean => "boolean",
            ScalarKind::DateTime => "temporal",
        }
    }

    /// The native Rust representation a loaded value of this kind holds.
    pub fn native_kind(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Integer => "i64",
            ScalarKind::Boolean => "bool",
            ScalarKind::Float => "f64",
            ScalarKind::DateTime => "DateTime<Utc>",
            ScalarKind::Uuid => "Uuid",
        }
    }

    /// Whether keys of this kind support case-insensitive lookup.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarKind::String)
    }

    /// Coerces a non-null raw value into this kind.
    pub fn load(&self, value: Value, context: &Context) -> Result<Value> {
        match self {
            ScalarKind::String => self.load_string(value, context),
            ScalarKind::Integer => self.load_integer(value, context),
            ScalarKind::Boolean => self.load_boolean(value, context),
            ScalarKind::Float => self.load_float(value, context),
            ScalarKind::DateTime => self.load_datetime(value, context),
            ScalarKind::Uuid => self.load_uuid(value, context),
        }
    }

    fn load_string(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::Str(s) => Ok(Value::Str(s)),
            Value::Int(i) => Ok(Value::Str(i.to_string())),
            Value::Float(f) => Ok(Value::Str(f.to_string())),
            Value::Bool(b) => Ok(Value::Str(b.to_string())),
            Value::Uuid(u) => Ok(Value::Str(u.to_string())),
            Value::DateTime(dt) => Ok(Value::Str(dt.to_rfc3339())),
            other => Err(self.incompatible(&other, context)),
        }
    }

    fn load_integer(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| self.unparseable(&s, e.to_string(), context)),
            other => Err(self.incompatible(&other, context)),
        }
    }

    fn load_boolean(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(1) => Ok(Value::Bool(true)),
            Value::Str(s) => match s.as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(self.unparseable(&s, "not a boolean literal", context)),
            },
            other => Err(self.incompatible(&other, context)),
        }
    }

    fn load_float(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::Float(f) => Ok(Value::Float(f)),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| self.unparseable(&s, e.to_string(), context)),
            other => Err(self.incompatible(&other, context)),
        }
    }

    fn load_datetime(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::DateTime(dt) => Ok(Value::DateTime(dt)),
            Value::Str(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| self.unparseable(&s, e.to_string(), context)),
            other => Err(self.incompatible(&other, context)),
        }
    }

    fn load_uuid(&self, value: Value, context: &Context) -> Result<Value> {
        match value {
            Value::Uuid(u) => Ok(Value::Uuid(u)),
            Value::Str(s) => Uuid::parse_str(&s)
                .map(Value::Uuid)
                .map_err(|e| self.unparseable(&s, e.to_string(), context)),
            other => Err(self.incompatible(&other, context)),
        }
    }

    /// Checks an already-constructed value against this kind.
    pub fn validate(&self, value: &Value, context: &Context) -> Vec<String> {
        let matches = matches!(
            (self, value),
            (ScalarKind::String, Value::Str(_))
                | (ScalarKind::Integer, Value::Int(_))
                | (ScalarKind::Boolean, Value::Bool(_))
                | (ScalarKind::Float, Value::Float(_))
                | (ScalarKind::Float, Value::Int(_))
                | (ScalarKind::DateTime, Value::DateTime(_))
                | (ScalarKind::Uuid, Value::Uuid(_))
        );
        if matches {
            vec![]
        } else {
            vec![format!(
                "Attribute {} must be of type {} but got {}",
                context,
                self.name(),
                value.kind_name()
            )]
        }
    }

    /// Dumps a loaded value of this kind to JSON.
    pub fn dump(&self, value: &Value) -> serde_json::Value {
        value.plain_to_json()
    }

    /// Produces a random example value of this kind.
    pub fn example(&self, _context: &Context) -> Value {
        let mut rng = rand::thread_rng();
        match self {
            ScalarKind::String => {
                let word = EXAMPLE_WORDS
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("example");
                Value::Str(word.to_string())
            }
            ScalarKind::Integer => Value::Int(rng.gen_range(0..EXAMPLE_NUMERIC_RANGE)),
            ScalarKind::Boolean => Value::Bool(rng.gen_bool(0.5)),
            ScalarKind::Float => Value::Float(rng.gen_range(0.0..EXAMPLE_NUMERIC_RANGE as f64)),
            ScalarKind::DateTime => Value::DateTime(Utc::now()),
            ScalarKind::Uuid => Value::Uuid(Uuid::new_v4()),
        }
    }

    /// Shallow description of this kind.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "family": self.family(),
            "native": self.native_kind(),
        })
    }

    fn incompatible(&self, value: &Value, context: &Context) -> Error {
        Error::incompatible(context, value.kind_name(), self.name())
    }

    fn unparseable(&self, raw: &str, reason: impl Into<String>, context: &Context) -> Error {
        Error::deserialization(context, "text", self.name(), {
            let reason = reason.into();
            format!("{:?}: {}", raw, reason)
        })
    }
}
