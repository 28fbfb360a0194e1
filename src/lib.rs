//! formwork - a strict, schema-driven structured value engine
//!
//! Given a declarative schema for a keyed container (field names, each
//! field's type and options, cross-field requirements), formwork converts
//! untrusted external representations into validated, strongly-typed
//! in-memory values, validates already-constructed values, serializes
//! values back to plain JSON trees, and synthesizes example values that
//! satisfy the schema.
//!
//! # Design Principles
//!
//! - Schemas are data: container types are minted by factories and
//!   compiled once, never subclassed
//! - Loading fails fast; validation accumulates every error
//! - Every diagnostic carries its full field-path context
//! - Cyclic value graphs terminate: dump renders a circular-reference
//!   marker, validation skips instances already on the traversal path
//! - The type layer is `Send + Sync`; instances belong to one call graph

pub mod attribute;
pub mod context;
pub mod errors;
pub mod requirement;
pub mod selector;
pub mod types;
pub mod value;

pub use attribute::{Attribute, AttributeOptions};
pub use context::Context;
pub use errors::{Error, Result};
pub use requirement::{Requirement, RequirementKind};
pub use selector::{SelectorError, SmartAttributeSelector};
pub use types::{
    AttrType, CollectionOptions, CollectionType, ContainerOptions, ContainerType, ExampleSize,
    ScalarKind, SchemaBuilder, StructuredMap, TraversalGuard, TypedList,
};
pub use value::{Key, Record, Value};
