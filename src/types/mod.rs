//! The closed set of schema-compatible types.
//!
//! Every type the engine can resolve is one of the tagged variants of
//! [`AttrType`]: the open wildcard, a leaf scalar, a keyed container, or
//! an ordered collection. All four answer the same capability surface
//! (`load`, `validate`, `dump`, `example`, `describe`, `native_kind`).

pub mod collection;
pub mod container;
pub mod scalar;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::errors::Result;
use crate::value::Value;

pub use collection::{CollectionOptions, CollectionType, ExampleSize, TypedList};
pub use container::{ContainerOptions, ContainerType, SchemaBuilder, StructuredMap};
pub use scalar::ScalarKind;

/// The set of container-instance identities on the current traversal
/// path. Threaded through validate and dump to break recursion across
/// mutually-referencing instances within a single call stack; this is a
/// reentrancy guard, not a thread-safety mechanism.
#[derive(Debug, Default)]
pub struct TraversalGuard {
    active: Vec<usize>,
}

impl TraversalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the instance with this identity is already on the path.
    pub fn active(&self, id: usize) -> bool {
        self.active.contains(&id)
    }

    /// Runs `f` with `id` on the path, releasing it on the way out
    /// regardless of what `f` returns. Returns `None` without running `f`
    /// when `id` is already active.
    pub fn enter<R>(&mut self, id: usize, f: impl FnOnce(&mut Self) -> R) -> Option<R> {
        if self.active(id) {
            return None;
        }
        self.active.push(id);
        let result = f(self);
        self.active.pop();
        Some(result)
    }
}

/// A schema-compatible type: one capability surface over the closed set
/// of variants.
#[derive(Debug, Clone)]
pub enum AttrType {
    /// The open, untyped wildcard: accepts and passes through any value.
    Any,
    Scalar(ScalarKind),
    Container(Arc<ContainerType>),
    Collection(Arc<CollectionType>),
}

impl AttrType {
    pub fn string() -> Self {
        AttrType::Scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        AttrType::Scalar(ScalarKind::Integer)
    }

    pub fn boolean() -> Self {
        AttrType::Scalar(ScalarKind::Boolean)
    }

    pub fn float() -> Self {
        AttrType::Scalar(ScalarKind::Float)
    }

    pub fn datetime() -> Self {
        AttrType::Scalar(ScalarKind::DateTime)
    }

    pub fn uuid() -> Self {
        AttrType::Scalar(ScalarKind::Uuid)
    }

    pub fn container(ty: Arc<ContainerType>) -> Self {
        AttrType::Container(ty)
    }

    pub fn collection(ty: Arc<CollectionType>) -> Self {
        AttrType::Collection(ty)
    }

    /// Type name used in diagnostics.
    pub fn name(&self) -> String {
        match self {
            AttrType::Any => "Any".to_string(),
            AttrType::Scalar(kind) => kind.name().to_string(),
            AttrType::Container(ty) => ty.display_name().to_string(),
            AttrType::Collection(_) => "Collection".to_string(),
        }
    }

    /// Family grouping reported by `describe`.
    pub fn family(&self) -> &'static str {
        match self {
            AttrType::Any => "any",
            AttrType::Scalar(kind) => kind.family(),
            AttrType::Container(_) => "hash",
            AttrType::Collection(_) => "array",
        }
    }

    /// The native Rust representation a loaded value of this type holds.
    pub fn native_kind(&self) -> &'static str {
        match self {
            AttrType::Any => "Value",
            AttrType::Scalar(kind) => kind.native_kind(),
            AttrType::Container(_) => "StructuredMap",
            AttrType::Collection(_) => "TypedList",
        }
    }

    /// Whether this type is a container with declared fields. Example
    /// generation uses this to bound recursion depth.
    pub(crate) fn has_declared_fields(&self) -> bool {
        match self {
            AttrType::Container(ty) => ty
                .schema()
                .map(|schema| !schema.fields.is_empty())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Loads a raw value. `Ok(None)` means the input carried no value.
    pub fn load(&self, value: Value, context: &Context, recurse: bool) -> Result<Option<Value>> {
        match self {
            AttrType::Any => Ok(match value {
                Value::Null => None,
                value => Some(value),
            }),
            AttrType::Scalar(kind) => match value {
                Value::Null => Ok(None),
                value => kind.load(value, context).map(Some),
            },
            AttrType::Container(ty) => {
                Ok(ty.load_with(value, context, recurse)?.map(Value::Map))
            }
            AttrType::Collection(ty) => {
                Ok(ty.load_with(value, context, recurse)?.map(Value::List))
            }
        }
    }

    /// Validates a non-null value, accumulating every error.
    pub fn validate(
        &self,
        value: &Value,
        context: &Context,
        guard: &mut TraversalGuard,
    ) -> Vec<String> {
        match self {
            AttrType::Any => vec![],
            AttrType::Scalar(kind) => kind.validate(value, context),
            AttrType::Container(ty) => match value {
                Value::Map(map) if Arc::ptr_eq(map.container_type(), ty) => {
                    map.validate_with(context, guard)
                }
                other => vec![format!(
                    "Attribute {} must be an instance of {} but got {}",
                    context,
                    ty.display_name(),
                    other.kind_name()
                )],
            },
            AttrType::Collection(ty) => match value {
                Value::List(list) if Arc::ptr_eq(list.collection_type(), ty) => {
                    list.validate_with(context, guard)
                }
                other => vec![format!(
                    "Attribute {} must be a collection but got {}",
                    context,
                    other.kind_name()
                )],
            },
        }
    }

    /// Dumps a loaded value to its plain JSON representation.
    pub fn dump(&self, value: &Value, guard: &mut TraversalGuard) -> Result<serde_json::Value> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Map(map) => map.dump_with(guard),
            Value::List(list) => list.dump_with(guard),
            other => Ok(other.plain_to_json()),
        }
    }

    /// Produces a raw example value of this type.
    pub fn example(&self, context: &Context) -> Result<Value> {
        match self {
            AttrType::Any => Ok(Value::Str("an object".to_string())),
            AttrType::Scalar(kind) => Ok(kind.example(context)),
            AttrType::Container(ty) => Ok(Value::Map(
                ty.example_with(Some(context.clone()), IndexMap::new())?,
            )),
            AttrType::Collection(ty) => Ok(Value::List(ty.example_in(context)?)),
        }
    }

    /// Description tree for tooling.
    pub fn describe(&self, shallow: bool) -> Result<serde_json::Value> {
        match self {
            AttrType::Any => Ok(serde_json::json!({ "name": "Any", "family": "any" })),
            AttrType::Scalar(kind) => Ok(kind.describe()),
            AttrType::Container(ty) => ty.describe(shallow),
            AttrType::Collection(ty) => ty.describe(shallow),
        }
    }
}
