//! Keyed structured containers: the schema engine.
//!
//! A `ContainerType` is a schema-bearing type descriptor minted by a
//! factory (`of`, `define`), never by subclassing: the schema is data,
//! compiled once on first use and cached. `StructuredMap` is the instance
//! side: a keyed collection loaded from untrusted input, validated against
//! the compiled schema, dumped back to plain JSON, or synthesized as a
//! lazy example.
//!
//! Key resolution for `get`/`set` follows a fixed five-branch order:
//! generic delegation, declared field, case-insensitive translation,
//! extra-keys handling (generic slot or named sub-container), unknown-key
//! rejection. The order must not change: case-insensitivity is checked
//! before extra-keys handling, and an unnamed extra-keys policy before a
//! named one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;

use crate::attribute::Attribute;
use crate::context::Context;
use crate::errors::{Error, Result};
use crate::requirement::Requirement;
use crate::selector::SmartAttributeSelector;
use crate::types::scalar::ScalarKind;
use crate::types::{AttrType, TraversalGuard};
use crate::value::{Key, Record, Value};

/// Example generation stops descending into nested containers past this
/// context depth, so self-referential schemas terminate.
pub const MAX_EXAMPLE_DEPTH: usize = 10;

/// Rendered in place of an instance already on the dump path.
pub const CIRCULAR_REFERENCE_MARKER: &str = "...";

/// Container-level options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerOptions {
    /// Accept keys beyond the declared fields.
    pub allow_extra: bool,
    /// Translate incoming keys to declared fields case-insensitively.
    /// Only legal when the key kind is string.
    pub case_insensitive_load: bool,
    /// Route extra keys into this declared field, which must itself be of
    /// a container type. Implies nothing unless `allow_extra` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_keys_field: Option<String>,
}

/// Receives the DSL front-end's output: the field map and requirement
/// list of a container definition.
#[derive(Default)]
pub struct SchemaBuilder {
    fields: IndexMap<String, Attribute>,
    requirements: Vec<Requirement>,
}

impl SchemaBuilder {
    /// Declares a named field. Re-declaring a name replaces it.
    pub fn attribute(&mut self, name: impl Into<String>, attribute: Attribute) -> &mut Self {
        self.fields.insert(name.into(), attribute);
        self
    }

    /// Declares a cross-field requirement.
    pub fn requirement(&mut self, requirement: Requirement) -> &mut Self {
        self.requirements.push(requirement);
        self
    }
}

/// The schema of a container type after its build-once compilation.
pub(crate) struct CompiledSchema {
    pub(crate) fields: IndexMap<String, Attribute>,
    pub(crate) requirements: Vec<Requirement>,
    /// Field names in declaration order, cached for requirement
    /// resolution and example selection.
    pub(crate) field_names: Vec<String>,
    /// lowercase -> canonical field name, populated only under
    /// `case_insensitive_load`.
    pub(crate) insensitive: HashMap<String, String>,
}

type BuildFn = dyn Fn(&Arc<ContainerType>, &mut SchemaBuilder) -> Result<()> + Send + Sync;

/// A schema-bearing keyed container type.
///
/// The type layer is immutable and `Send + Sync`; concurrent first use
/// races on the compilation slot are serialized by the `OnceLock`. A
/// failed compilation is memoized and re-surfaces on every later use.
pub struct ContainerType {
    name: Option<String>,
    key_kind: Option<ScalarKind>,
    value_attr: Attribute,
    options: ContainerOptions,
    definition: Option<Box<BuildFn>>,
    compiled: OnceLock<Result<CompiledSchema>>,
    weak_self: Weak<ContainerType>,
}

impl ContainerType {
    fn from_parts(
        name: Option<String>,
        key_kind: Option<ScalarKind>,
        value_type: AttrType,
        options: ContainerOptions,
        definition: Option<Box<BuildFn>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name,
            key_kind,
            value_attr: Attribute::optional(value_type),
            options,
            definition,
            compiled: OnceLock::new(),
            weak_self: weak.clone(),
        })
    }

    /// The open, untyped container: any key, any value, no declared
    /// fields. Every call mints a distinct type.
    pub fn untyped() -> Arc<Self> {
        Self::from_parts(
            None,
            None,
            AttrType::Any,
            ContainerOptions::default(),
            None,
        )
    }

    /// A generic keyed container of `key` to `value`, without declared
    /// fields. The receiver of an `of` call is never mutated; a new type
    /// is minted.
    pub fn of(key: ScalarKind, value: AttrType) -> Arc<Self> {
        Self::from_parts(
            None,
            Some(key),
            value,
            ContainerOptions::default(),
            None,
        )
    }

    /// A named struct-like container with declared fields. The definition
    /// closure is the DSL front-end's hand-off; it runs once, lazily, on
    /// first use of the schema, and receives the `Arc` of the type being
    /// defined so schemas may reference themselves.
    pub fn define<F>(name: impl Into<String>, options: ContainerOptions, definition: F) -> Arc<Self>
    where
        F: Fn(&Arc<ContainerType>, &mut SchemaBuilder) -> Result<()> + Send + Sync + 'static,
    {
        Self::from_parts(
            Some(name.into()),
            Some(ScalarKind::String),
            AttrType::Any,
            options,
            Some(Box::new(definition)),
        )
    }

    /// An anonymous struct-like container with declared fields.
    pub fn define_anonymous<F>(options: ContainerOptions, definition: F) -> Arc<Self>
    where
        F: Fn(&Arc<ContainerType>, &mut SchemaBuilder) -> Result<()> + Send + Sync + 'static,
    {
        Self::from_parts(None, Some(ScalarKind::String), AttrType::Any, options, Some(Box::new(definition)))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name used in diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Hash")
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn key_kind(&self) -> Option<ScalarKind> {
        self.key_kind
    }

    pub(crate) fn value_attr(&self) -> &Attribute {
        &self.value_attr
    }

    /// The compiled schema, building it on first use. A stored definition
    /// fault is returned on this and every later call.
    pub(crate) fn schema(&self) -> Result<&CompiledSchema> {
        match self.compiled.get_or_init(|| {
            self.compile().map_err(|error| {
                tracing::warn!(ty = self.display_name(), %error, "container definition is invalid");
                error
            })
        }) {
            Ok(schema) => Ok(schema),
            Err(error) => Err(error.clone()),
        }
    }

    fn compile(&self) -> Result<CompiledSchema> {
        let type_name = self.display_name().to_string();

        let mut builder = SchemaBuilder::default();
        if let Some(definition) = &self.definition {
            let this = self
                .weak_self
                .upgrade()
                .ok_or_else(|| Error::definition(&type_name, "type handle dropped before compilation"))?;
            definition(&this, &mut builder)
                .map_err(|cause| Error::definition(&type_name, cause.to_string()))?;
        }
        let SchemaBuilder {
            fields,
            requirements,
        } = builder;

        if self.options.case_insensitive_load
            && !self.key_kind.map_or(false, |kind| kind.is_string_like())
        {
            return Err(Error::definition(
                &type_name,
                format!(
                    "case_insensitive_load may not be used with keys of type {}",
                    self.key_kind.map_or("Any", |kind| kind.name())
                ),
            ));
        }

        let field_names: Vec<String> = fields.keys().cloned().collect();
        for requirement in &requirements {
            if let Some(named) = requirement.fields() {
                let missing: Vec<&str> = named
                    .iter()
                    .filter(|name| !fields.contains_key(*name))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(Error::definition(
                        &type_name,
                        format!(
                            "invalid field name(s) found ({}) when defining a {} requirement. The only existing fields are [{}]",
                            missing.join(", "),
                            requirement.kind().label(),
                            field_names.join(", ")
                        ),
                    ));
                }
            }
        }

        if let Some(extra) = &self.options.extra_keys_field {
            match fields.get(extra) {
                Some(attribute) if matches!(attribute.ty(), AttrType::Container(_)) => {}
                Some(_) => {
                    return Err(Error::definition(
                        &type_name,
                        format!("extra-keys field {} must be of a container type", extra),
                    ))
                }
                None => {
                    return Err(Error::definition(
                        &type_name,
                        format!("extra-keys field {} names no declared field", extra),
                    ))
                }
            }
        }

        let insensitive = if self.options.case_insensitive_load {
            fields
                .keys()
                .map(|name| (name.to_lowercase(), name.clone()))
                .collect()
        } else {
            HashMap::new()
        };

        tracing::debug!(
            ty = %type_name,
            fields = fields.len(),
            requirements = requirements.len(),
            "compiled container schema"
        );

        Ok(CompiledSchema {
            fields,
            requirements,
            field_names,
            insensitive,
        })
    }

    /// Whether this type is the open untyped container.
    fn is_open(&self) -> Result<bool> {
        Ok(self.key_kind.is_none()
            && matches!(self.value_attr.ty(), AttrType::Any)
            && self.schema()?.fields.is_empty())
    }

    pub(crate) fn coerce_key(&self, key: Value, context: &Context) -> Result<Key> {
        let loaded = match self.key_kind {
            Some(kind) => match key {
                Value::Null => return Err(Error::incompatible(context, "null", "key")),
                value => kind.load(value, context)?,
            },
            None => key,
        };
        Key::try_from_value(loaded, context)
    }

    /// Loads an untrusted raw value into an instance of this type.
    ///
    /// Accepts an instance of the same type unchanged, `Null` (producing
    /// no value unless `recurse` asks for an empty container with its
    /// defaults), a plain record, a foreign container instance, or a JSON
    /// object string.
    pub fn load(self: &Arc<Self>, value: impl Into<Value>) -> Result<Option<StructuredMap>> {
        self.load_with(value.into(), &Context::root(), false)
    }

    pub fn load_with(
        self: &Arc<Self>,
        value: Value,
        context: &Context,
        recurse: bool,
    ) -> Result<Option<StructuredMap>> {
        if let Value::Map(map) = &value {
            if Arc::ptr_eq(map.container_type(), self) {
                return Ok(Some(map.clone()));
            }
        }
        if value.is_null() && !recurse {
            return Ok(None);
        }

        let record = self.parse(value, context)?;
        if !self.schema()?.fields.is_empty() {
            self.from_record(record, context, recurse).map(Some)
        } else {
            self.load_generic(record, context).map(Some)
        }
    }

    fn parse(&self, value: Value, context: &Context) -> Result<Record> {
        match value {
            Value::Null => Ok(Record::new()),
            Value::Record(record) => Ok(record),
            Value::Map(map) => map.contents(),
            Value::Str(text) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                    Error::deserialization(context, "JSON", self.display_name(), e.to_string())
                })?;
                match Value::from(parsed) {
                    Value::Record(record) => Ok(record),
                    other => Err(Error::incompatible(
                        context,
                        format!("JSON {}", other.kind_name()),
                        self.display_name(),
                    )),
                }
            }
            other => Err(Error::incompatible(
                context,
                other.kind_name(),
                self.display_name(),
            )),
        }
    }

    /// Declared-fields load path. Seeds the named extra-keys field first
    /// (so extra-key aggregation has a target), routes every other entry
    /// through `set`, then back-fills defaults for fields with no key
    /// present. Explicit input is never overridden by a default.
    pub(crate) fn from_record(
        self: &Arc<Self>,
        record: Record,
        context: &Context,
        recurse: bool,
    ) -> Result<StructuredMap> {
        let map = StructuredMap::new(self.clone());
        let schema = self.schema()?;

        if let Some(extra) = &self.options.extra_keys_field {
            let sub = context.key(extra);
            let seed = record
                .get(&Key::from(extra.as_str()))
                .cloned()
                .unwrap_or_else(|| Value::Record(Record::new()));
            map.set_with(Value::from(extra.as_str()), seed, &sub, recurse)?;
        }

        for (key, value) in &record {
            if let Some(extra) = &self.options.extra_keys_field {
                if key.as_field() == Some(extra.as_str()) {
                    continue;
                }
            }
            let sub = context.key(key);
            map.set_with(Value::from(key.clone()), value.clone(), &sub, recurse)?;
        }

        for (name, attribute) in &schema.fields {
            let key = Key::from(name.as_str());
            if map.has_key(&key) {
                continue;
            }
            let sub = context.key(name);
            if let Some(default) = attribute.load(Value::Null, &sub, recurse)? {
                map.insert(key, default);
            }
        }

        Ok(map)
    }

    /// Generic load path: the declared key and value types are applied to
    /// every entry.
    fn load_generic(self: &Arc<Self>, record: Record, context: &Context) -> Result<StructuredMap> {
        let map = StructuredMap::new(self.clone());
        if self.is_open()? {
            for (key, value) in record {
                map.insert(key, value);
            }
            return Ok(map);
        }

        for (key, value) in record {
            let key = self.coerce_key(Value::from(key), context)?;
            let loaded = self.value_attr.load(value, context, false)?;
            map.insert(key, loaded.unwrap_or(Value::Null));
        }
        Ok(map)
    }

    /// Synthesizes an example instance of this type.
    pub fn example(self: &Arc<Self>) -> Result<StructuredMap> {
        self.example_with(None, IndexMap::new())
    }

    /// Example generation with explicit values for chosen fields. Fields
    /// are picked by the attribute selector so `exactly`/`at_most`
    /// requirements hold; on any selector failure every field is
    /// populated instead. Selected fields become lazy slots, materialized
    /// only when read.
    pub fn example_with(
        self: &Arc<Self>,
        context: Option<Context>,
        values: IndexMap<String, Value>,
    ) -> Result<StructuredMap> {
        let schema = self.schema()?;
        if self.is_open()? {
            return Ok(StructuredMap::new(self.clone()));
        }
        let context = context.unwrap_or_else(|| Context::example_root(self.display_name()));

        if schema.fields.is_empty() {
            return self.example_generic(&context);
        }

        let explicit: Vec<String> = values.keys().cloned().collect();
        let selected = SmartAttributeSelector::new(
            &schema.requirements,
            &schema.field_names,
            explicit.iter(),
        )
        .process()
        .unwrap_or_else(|error| {
            tracing::debug!(
                ty = self.display_name(),
                %error,
                "attribute selector failed; populating all fields"
            );
            schema.field_names.clone()
        });

        let map = StructuredMap::new(self.clone());
        for (name, attribute) in &schema.fields {
            if !selected.contains(name) {
                continue;
            }
            if attribute.ty().has_declared_fields() && context.depth() > MAX_EXAMPLE_DEPTH {
                continue;
            }
            let sub = context.key(name);
            let attribute = attribute.clone();
            let explicit_value = values.get(name).cloned();
            map.insert_pending(
                Key::from(name.as_str()),
                Box::new(move || {
                    let raw = match explicit_value {
                        Some(value) => value,
                        None => attribute.example(&sub)?,
                    };
                    attribute.load(raw, &sub, false)
                }),
            );
        }
        Ok(map)
    }

    fn example_generic(self: &Arc<Self>, context: &Context) -> Result<StructuredMap> {
        let map = StructuredMap::new(self.clone());
        let count = rand::thread_rng().gen_range(1..=3);
        for i in 0..count {
            let key_value = match self.key_kind {
                Some(kind) => kind.example(&context.at(i)),
                None => Value::Str(format!("key{}", i)),
            };
            let key = Key::try_from_value(key_value, context)?;
            let sub = context.key(&key);
            let raw = self.value_attr.example(&sub)?;
            let loaded = self.value_attr.load(raw, &sub, false)?;
            map.insert(key, loaded.unwrap_or(Value::Null));
        }
        Ok(map)
    }

    /// Description tree for tooling: name, family, key type, per-field
    /// attribute descriptions, and requirements. Per-field `required`
    /// flags are folded into an `all` requirement.
    pub fn describe(&self, shallow: bool) -> Result<serde_json::Value> {
        let schema = self.schema()?;
        let mut described = serde_json::json!({
            "name": self.display_name(),
            "family": "hash",
        });
        if let Some(kind) = self.key_kind {
            described["key"] = serde_json::json!({ "type": kind.describe() });
        }

        if schema.fields.is_empty() {
            described["value"] = serde_json::json!({ "type": self.value_attr.ty().describe(true)? });
            return Ok(described);
        }

        // Split out the field list at the root or for anonymous types.
        if !shallow || self.name.is_none() {
            let mut required_names: Vec<String> = Vec::new();
            let mut attributes = serde_json::Map::new();
            for (name, attribute) in &schema.fields {
                if attribute.is_required() {
                    required_names.push(name.clone());
                }
                attributes.insert(name.clone(), attribute.describe(true)?);
            }
            described["attributes"] = serde_json::Value::Object(attributes);

            let mut requirements: Vec<serde_json::Value> = Vec::new();
            for requirement in &schema.requirements {
                let mut item = requirement.describe();
                if item["type"] == "all" && !required_names.is_empty() {
                    let mut names: Vec<String> = item["attributes"]
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    for name in required_names.drain(..) {
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                    item["attributes"] = serde_json::json!(names);
                }
                requirements.push(item);
            }
            if !required_names.is_empty() {
                requirements
                    .push(serde_json::json!({ "type": "all", "attributes": required_names }));
            }
            described["requirements"] = serde_json::Value::Array(requirements);
        }
        Ok(described)
    }
}

impl fmt::Debug for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerType")
            .field("name", &self.name)
            .field("key_kind", &self.key_kind)
            .field("options", &self.options)
            .finish()
    }
}

type ExampleThunk = Box<dyn FnOnce() -> Result<Option<Value>>>;

struct MapInner {
    contents: Record,
    /// Lazy example slots, materialized on first read.
    pending: IndexMap<Key, ExampleThunk>,
}

/// An instance of a [`ContainerType`].
///
/// Instances are cheap shared handles private to one call graph; callers
/// needing cross-thread access must treat them as snapshots and provide
/// their own synchronization at a higher level.
#[derive(Clone)]
pub struct StructuredMap {
    ty: Arc<ContainerType>,
    inner: Rc<RefCell<MapInner>>,
}

impl StructuredMap {
    /// An empty instance of the given type.
    pub fn new(ty: Arc<ContainerType>) -> Self {
        Self {
            ty,
            inner: Rc::new(RefCell::new(MapInner {
                contents: Record::new(),
                pending: IndexMap::new(),
            })),
        }
    }

    pub fn container_type(&self) -> &Arc<ContainerType> {
        &self.ty
    }

    /// Stable identity of this instance for traversal-path tracking.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner.contents.len() + inner.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_key(&self, key: &Key) -> bool {
        let inner = self.inner.borrow();
        inner.contents.contains_key(key) || inner.pending.contains_key(key)
    }

    pub fn keys(&self) -> Vec<Key> {
        let inner = self.inner.borrow();
        inner
            .contents
            .keys()
            .chain(inner.pending.keys())
            .cloned()
            .collect()
    }

    /// Raw index assignment: stores a value without schema routing, and
    /// drops any lazy slot under the key.
    pub fn insert(&self, key: Key, value: Value) {
        let mut inner = self.inner.borrow_mut();
        inner.pending.shift_remove(&key);
        inner.contents.insert(key, value);
    }

    /// Removes a key from storage.
    pub fn remove(&self, key: &Key) -> Option<Value> {
        let mut inner = self.inner.borrow_mut();
        inner.pending.shift_remove(key);
        inner.contents.shift_remove(key)
    }

    fn raw_get(&self, key: &Key) -> Option<Value> {
        self.inner.borrow().contents.get(key).cloned()
    }

    pub(crate) fn insert_pending(&self, key: Key, thunk: ExampleThunk) {
        self.inner.borrow_mut().pending.insert(key, thunk);
    }

    fn materialize(&self, key: &Key) -> Result<()> {
        let thunk = self.inner.borrow_mut().pending.shift_remove(key);
        if let Some(thunk) = thunk {
            if let Some(value) = thunk()? {
                self.inner.borrow_mut().contents.insert(key.clone(), value);
            }
        }
        Ok(())
    }

    fn materialize_all(&self) -> Result<()> {
        loop {
            let next = self.inner.borrow().pending.keys().next().cloned();
            match next {
                Some(key) => self.materialize(&key)?,
                None => return Ok(()),
            }
        }
    }

    /// The materialized contents of this instance.
    pub fn contents(&self) -> Result<Record> {
        self.materialize_all()?;
        Ok(self.inner.borrow().contents.clone())
    }

    /// Reads a field or key through the schema.
    pub fn get(&self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let context = Context::root().key(key_segment(&key));
        self.get_with(key, &context)
    }

    /// Reads a field or key through the schema with an explicit context.
    ///
    /// Reading a declared field that loads to no value returns `None`
    /// without materializing the key in storage.
    pub fn get_with(&self, key: Value, context: &Context) -> Result<Option<Value>> {
        let key = self.ty.coerce_key(key, context)?;
        let schema = self.ty.schema()?;
        self.materialize(&key)?;

        if schema.fields.is_empty() {
            return self.get_generic(&key, context);
        }

        if let Some(attribute) = key.as_field().and_then(|name| schema.fields.get(name)) {
            let stored = self.raw_get(&key).unwrap_or(Value::Null);
            let loaded = attribute.load(stored, context, false)?;
            return Ok(match loaded {
                None => None,
                Some(value) => {
                    self.insert(key, value.clone());
                    Some(value)
                }
            });
        }

        if self.ty.options().case_insensitive_load {
            if let Some(canonical) = key
                .as_field()
                .and_then(|name| schema.insensitive.get(&name.to_lowercase()))
            {
                return self.get_with(Value::from(canonical.as_str()), context);
            }
        }

        if self.ty.options().allow_extra {
            match &self.ty.options().extra_keys_field {
                None => {
                    let stored = self.raw_get(&key).unwrap_or(Value::Null);
                    let loaded = self.ty.value_attr().load(stored, context, false)?;
                    if let Some(value) = &loaded {
                        self.insert(key, value.clone());
                    }
                    return Ok(loaded);
                }
                Some(extra) => {
                    if let Some(Value::Map(bucket)) = self.raw_get(&Key::from(extra.as_str())) {
                        return bucket.get_with(Value::from(key), context);
                    }
                }
            }
        }

        Err(Error::unknown_key(context, key.to_string()))
    }

    fn get_generic(&self, key: &Key, context: &Context) -> Result<Option<Value>> {
        if let Some(stored) = self.raw_get(key) {
            let loaded = self.ty.value_attr().load(stored, context, false)?;
            if let Some(value) = &loaded {
                self.insert(key.clone(), value.clone());
            }
            return Ok(loaded);
        }
        if self.ty.options().case_insensitive_load {
            if let Key::Str(wanted) = key {
                let lower = wanted.to_lowercase();
                let found = self.inner.borrow().contents.keys().find_map(|k| match k {
                    Key::Str(s) if s.to_lowercase() == lower => Some(k.clone()),
                    _ => None,
                });
                if let Some(actual) = found {
                    return self.get_generic(&actual, context);
                }
            }
        }
        Ok(None)
    }

    /// Writes a field or key through the schema, returning the loaded
    /// value that was stored.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let context = Context::root().key(key_segment(&key));
        self.set_with(key, value.into(), &context, false)
    }

    /// Writes a field or key through the schema with an explicit context.
    pub fn set_with(
        &self,
        key: Value,
        value: Value,
        context: &Context,
        recurse: bool,
    ) -> Result<Option<Value>> {
        let key = self.ty.coerce_key(key, context)?;
        let schema = self.ty.schema()?;

        if schema.fields.is_empty() {
            let loaded = self.ty.value_attr().load(value, context, false)?;
            self.insert(key, loaded.clone().unwrap_or(Value::Null));
            return Ok(loaded);
        }

        if let Some(attribute) = key.as_field().and_then(|name| schema.fields.get(name)) {
            let loaded = attribute.load(value, context, recurse)?;
            self.insert(key, loaded.clone().unwrap_or(Value::Null));
            return Ok(loaded);
        }

        if self.ty.options().case_insensitive_load {
            if let Some(canonical) = key
                .as_field()
                .and_then(|name| schema.insensitive.get(&name.to_lowercase()))
            {
                return self.set_with(Value::from(canonical.as_str()), value, context, recurse);
            }
        }

        if self.ty.options().allow_extra {
            match &self.ty.options().extra_keys_field {
                None => {
                    let loaded = self.ty.value_attr().load(value, context, false)?;
                    self.insert(key, loaded.clone().unwrap_or(Value::Null));
                    return Ok(loaded);
                }
                Some(extra) => {
                    let extra_key = Key::from(extra.as_str());
                    if self.raw_get(&extra_key).is_none() {
                        // Initialize the bucket from its own attribute so
                        // it exists before the first routed key.
                        if let Some(attribute) = schema.fields.get(extra) {
                            if let Some(bucket) =
                                attribute.load(Value::Record(Record::new()), context, false)?
                            {
                                self.insert(extra_key.clone(), bucket);
                            }
                        }
                    }
                    if let Some(Value::Map(bucket)) = self.raw_get(&extra_key) {
                        return bucket.set_with(Value::from(key), value, context, recurse);
                    }
                }
            }
        }

        Err(Error::unknown_key(context, key.to_string()))
    }

    /// Validates this instance, accumulating every error.
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
        if let Err(error) = self.materialize_all() {
            return vec![error.to_string()];
        }
        let schema = match self.ty.schema() {
            Ok(schema) => schema,
            Err(error) => return vec![error.to_string()],
        };

        let entered = guard.enter(self.identity(), |guard| {
            if schema.fields.is_empty() {
                self.validate_generic(context, guard)
            } else {
                self.validate_fields(schema, context, guard)
            }
        });
        // None: this instance is already mid-validation up the stack; the
        // cycle is broken by skipping it.
        entered.unwrap_or_default()
    }

    fn validate_fields(
        &self,
        schema: &CompiledSchema,
        context: &Context,
        guard: &mut TraversalGuard,
    ) -> Vec<String> {
        let contents = self.inner.borrow().contents.clone();

        // Unexpected keys preempt all other validation for this call.
        if !self.ty.options().allow_extra {
            let extra: Vec<String> = contents
                .keys()
                .filter(|key| {
                    key.as_field()
                        .map_or(true, |name| !schema.fields.contains_key(name))
                })
                .map(|key| format!("{} cannot have key {}", context, key))
                .collect();
            if !extra.is_empty() {
                return extra;
            }
        }

        let mut errors = Vec::new();
        let mut present: Vec<String> = Vec::new();
        for (name, attribute) in &schema.fields {
            let sub = context.key(name);
            let value = contents.get(&Key::from(name.as_str()));
            if let Some(value) = value {
                if !value.is_null() {
                    present.push(name.clone());
                }
                // Skip values already on the validation path: this breaks
                // validation cycles between mutually-referencing schemas.
                if let Value::Map(map) = value {
                    if guard.active(map.identity()) {
                        continue;
                    }
                }
            }
            errors.extend(attribute.validate_inner(value, &sub, guard));
        }

        for requirement in &schema.requirements {
            errors.extend(requirement.validate(&present, &schema.field_names, context));
        }
        errors
    }

    fn validate_generic(&self, context: &Context, guard: &mut TraversalGuard) -> Vec<String> {
        let contents = self.inner.borrow().contents.clone();
        let mut errors = Vec::new();
        for (key, value) in &contents {
            if let Some(kind) = self.ty.key_kind() {
                let sub = context.key(key);
                errors.extend(kind.validate(&Value::from(key.clone()), &sub));
            }
            if !matches!(self.ty.value_attr().ty(), AttrType::Any) {
                let sub = context.value(key);
                errors.extend(self.ty.value_attr().validate_inner(Some(value), &sub, guard));
            }
        }
        errors
    }

    /// Dumps this instance to a plain JSON tree. An instance already on
    /// the dump path renders as the circular-reference marker; the
    /// traversal entry is released on the way out even on the error path.
    pub fn dump(&self) -> Result<serde_json::Value> {
        let mut guard = TraversalGuard::new();
        self.dump_with(&mut guard)
    }

    pub(crate) fn dump_with(&self, guard: &mut TraversalGuard) -> Result<serde_json::Value> {
        self.materialize_all()?;
        let schema = self.ty.schema()?;

        let entered = guard.enter(self.identity(), |guard| -> Result<serde_json::Value> {
            let contents = self.inner.borrow().contents.clone();
            let mut object = serde_json::Map::new();
            for (key, value) in &contents {
                let dumped = match key.as_field().and_then(|name| schema.fields.get(name)) {
                    Some(attribute) => attribute.dump(value, guard)?,
                    None => self.ty.value_attr().dump(value, guard)?,
                };
                object.insert(key.dump_string(), dumped);
            }
            Ok(serde_json::Value::Object(object))
        });
        match entered {
            Some(result) => result,
            None => Ok(serde_json::Value::String(CIRCULAR_REFERENCE_MARKER.to_string())),
        }
    }
}

impl PartialEq for StructuredMap {
    /// Instances compare by materialized contents; lazy slots that have
    /// never been read are not considered.
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.borrow().contents == other.inner.borrow().contents
    }
}

impl fmt::Debug for StructuredMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("StructuredMap")
            .field("type", &self.ty.display_name())
            .field("contents", &inner.contents)
            .field("pending", &inner.pending.len())
            .finish()
    }
}

fn key_segment(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Uuid(u) => u.to_string(),
        other => other.kind_name().to_string(),
    }
}
