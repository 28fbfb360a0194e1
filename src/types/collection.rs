//! Ordered collections of a single member type.
//!
//! Collections follow the same attribute-delegation discipline as the
//! keyed containers, over a sequence instead of a field map: every element
//! loads, validates, and dumps through the member attribute under its own
//! index-qualified sub-context.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;

use crate::attribute::Attribute;
use crate::context::Context;
use crate::errors::{Error, Result};
use crate::types::{AttrType, TraversalGuard};
use crate::value::Value;

/// How many members `example` produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleSize {
    Exactly(usize),
    Between(usize, usize),
}

/// Collection-level options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionOptions {
    /// Member count for generated examples; 1 to 3 when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_size: Option<ExampleSize>,
}

/// A homogeneous ordered sequence type.
#[derive(Debug)]
pub struct CollectionType {
    member: Attribute,
    options: CollectionOptions,
}

impl CollectionType {
    /// A collection of the given member type. Minting a specialization
    /// never touches the receiver.
    pub fn of(member: AttrType) -> Arc<Self> {
        Self::with_member(Attribute::optional(member), CollectionOptions::default())
    }

    pub fn with_member(member: Attribute, options: CollectionOptions) -> Arc<Self> {
        Arc::new(Self { member, options })
    }

    pub fn member(&self) -> &Attribute {
        &self.member
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Loads an untrusted raw value into an instance of this type.
    ///
    /// Accepts an instance of the same type unchanged, `Null` (producing
    /// no value), a plain sequence, a foreign collection instance, or a
    /// JSON array string.
    pub fn load(self: &Arc<Self>, value: impl Into<Value>) -> Result<Option<TypedList>> {
        self.load_with(value.into(), &Context::root(), false)
    }

    pub fn load_with(
        self: &Arc<Self>,
        value: Value,
        context: &Context,
        recurse: bool,
    ) -> Result<Option<TypedList>> {
        match value {
            Value::List(list) if Arc::ptr_eq(list.collection_type(), self) => Ok(Some(list)),
            Value::List(list) => self
                .load_items(list.items().to_vec(), context, recurse)
                .map(Some),
            Value::Null => Ok(None),
            Value::Items(items) => self.load_items(items, context, recurse).map(Some),
            Value::Str(text) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    Error::deserialization(context, "JSON", "Collection", e.to_string())
                })?;
                match Value::from(parsed) {
                    Value::Items(items) => self.load_items(items, context, recurse).map(Some),
                    other => Err(Error::incompatible(
                        context,
                        format!("JSON {}", other.kind_name()),
                        "Collection",
                    )),
                }
            }
            other => Err(Error::incompatible(context, other.kind_name(), "Collection")),
        }
    }

    fn load_items(
        self: &Arc<Self>,
        items: Vec<Value>,
        context: &Context,
        recurse: bool,
    ) -> Result<TypedList> {
        let mut loaded = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let sub = context.at(i);
            loaded.push(
                self.member
                    .load(item, &sub, recurse)?
                    .unwrap_or(Value::Null),
            );
        }
        Ok(TypedList {
            ty: self.clone(),
            items: loaded,
        })
    }

    /// Synthesizes an example instance of this type.
    pub fn example(self: &Arc<Self>) -> Result<TypedList> {
        self.example_in(&Context::example_root("Collection"))
    }

    pub fn example_in(self: &Arc<Self>, context: &Context) -> Result<TypedList> {
        let count = match self.options.example_size {
            Some(ExampleSize::Exactly(n)) => n,
            Some(ExampleSize::Between(low, high)) => rand::thread_rng().gen_range(low..=high),
            None => rand::thread_rng().gen_range(1..=3),
        };

        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let sub = context.at(i);
            // Deep member examples stop at the container depth bound.
            if self.member.ty().has_declared_fields()
                && sub.depth() > super::container::MAX_EXAMPLE_DEPTH
            {
                break;
            }
            let raw = self.member.example(&sub)?;
            if let Some(value) = self.member.load(raw, &sub, false)? {
                items.push(value);
            }
        }
        Ok(TypedList {
            ty: self.clone(),
            items,
        })
    }

    /// Description tree for tooling.
    pub fn describe(&self, _shallow: bool) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "name": "Collection",
            "family": "array",
            "member": self.member.describe(true)?,
        }))
    }
}

/// An instance of a [`CollectionType`].
#[derive(Debug, Clone)]
pub struct TypedList {
    ty: Arc<CollectionType>,
    items: Vec<Value>,
}

impl TypedList {
    /// An empty instance of the given type.
    pub fn new(ty: Arc<CollectionType>) -> Self {
        Self { ty, items: Vec::new() }
    }

    pub fn collection_type(&self) -> &Arc<CollectionType> {
        &self.ty
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Raw append, without member loading.
    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    /// Validates every element independently and concatenates the errors.
    pub fn validate(&self) -> Vec<String> {
        self.validate_in(&Context::root())
    }

    pub fn validate_in(&self, context: &Context) -> Vec<String> {
        let mut guard = TraversalGuard::new();
        self.validate_with(context, &mut guard)
    }

    pub(crate) fn validate_with(
        &self,
        context: &Context,
        guard: &mut TraversalGuard,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        for (i, item) in self.items.iter().enumerate() {
            let sub = context.at(i);
            if let Value::Map(map) = item {
                if guard.active(map.identity()) {
                    continue;
                }
            }
            errors.extend(self.ty.member.validate_inner(Some(item), &sub, guard));
        }
        errors
    }

    /// Dumps this instance to a plain JSON array.
    pub fn dump(&self) -> Result<serde_json::Value> {
        let mut guard = TraversalGuard::new();
        self.dump_with(&mut guard)
    }

    pub(crate) fn dump_with(&self, guard: &mut TraversalGuard) -> Result<serde_json::Value> {
        let mut dumped = Vec::with_capacity(self.items.len());
        for item in &self.items {
            dumped.push(self.ty.member.dump(item, guard)?);
        }
        Ok(serde_json::Value::Array(dumped))
    }
}

impl PartialEq for TypedList {
    /// Instances compare by their items.
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarKind;
    use serde_json::json;

    fn integers() -> Arc<CollectionType> {
        CollectionType::of(AttrType::Scalar(ScalarKind::Integer))
    }

    #[test]
    fn test_load_coerces_each_element() {
        let list = integers()
            .load(Value::Items(vec![Value::Int(1), Value::from("2")]))
            .unwrap()
            .unwrap();
        assert_eq!(list.items(), &[Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_load_null_produces_no_value() {
        assert_eq!(integers().load(Value::Null).unwrap(), None);
    }

    #[test]
    fn test_load_accepts_json_array_text() {
        let list = integers().load("[1, 2, 3]").unwrap().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.dump().unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_load_rejects_json_object_text() {
        let err = integers().load("{\"a\": 1}").unwrap_err();
        assert!(matches!(err, Error::IncompatibleType { .. }));
    }

    #[test]
    fn test_load_rejects_malformed_json_text() {
        let err = integers().load("[1,").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_element_errors_carry_index_context() {
        let err = integers()
            .load(Value::Items(vec![Value::Int(1), Value::from("nope")]))
            .unwrap_err();
        assert!(err.to_string().contains("at(1)"));
    }

    #[test]
    fn test_validate_concatenates_element_errors() {
        let ty = integers();
        let mut list = TypedList::new(ty);
        list.push(Value::from("one"));
        list.push(Value::Int(2));
        list.push(Value::from("three"));

        let errors = list.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("at(0)"));
        assert!(errors[1].contains("at(2)"));
    }

    #[test]
    fn test_same_instance_passes_through_load() {
        let ty = integers();
        let list = ty.load("[5]").unwrap().unwrap();
        let reloaded = ty.load(Value::List(list.clone())).unwrap().unwrap();
        assert_eq!(list, reloaded);
    }

    #[test]
    fn test_example_size_defaults_to_one_through_three() {
        let ty = integers();
        for _ in 0..20 {
            let example = ty.example().unwrap();
            assert!((1..=3).contains(&example.len()));
            assert!(example.validate().is_empty());
        }
    }

    #[test]
    fn test_example_size_exactly() {
        let ty = CollectionType::with_member(
            Attribute::optional(AttrType::Scalar(ScalarKind::Integer)),
            CollectionOptions {
                example_size: Some(ExampleSize::Exactly(5)),
            },
        );
        assert_eq!(ty.example().unwrap().len(), 5);
    }

    #[test]
    fn test_example_size_ranged() {
        let ty = CollectionType::with_member(
            Attribute::optional(AttrType::Scalar(ScalarKind::Integer)),
            CollectionOptions {
                example_size: Some(ExampleSize::Between(2, 4)),
            },
        );
        for _ in 0..20 {
            assert!((2..=4).contains(&ty.example().unwrap().len()));
        }
    }

    #[test]
    fn test_describe_reports_member() {
        let described = integers().describe(false).unwrap();
        assert_eq!(described["name"], "Collection");
        assert_eq!(described["member"]["name"], "Integer");
    }
}
