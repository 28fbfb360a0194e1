//! Attributes: named schema slots.
//!
//! An attribute wraps a type with per-field options and delegates the
//! capability surface to it, applying option semantics around the call:
//! defaults are applied when the type loads to no value, requiredness is
//! enforced at validation time.

use serde::Serialize;

use crate::context::Context;
use crate::errors::Result;
use crate::types::{AttrType, TraversalGuard};
use crate::value::Value;

/// Per-field options carried by an attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeOptions {
    /// Whether the field must hold a value for the container to validate.
    pub required: bool,
    /// Raw default, loaded through the attribute's type when applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A schema slot: a type plus per-field options.
#[derive(Clone)]
pub struct Attribute {
    ty: AttrType,
    options: AttributeOptions,
}

impl Attribute {
    /// An optional attribute of the given type.
    pub fn optional(ty: AttrType) -> Self {
        Self {
            ty,
            options: AttributeOptions::default(),
        }
    }

    /// A required attribute of the given type.
    pub fn required(ty: AttrType) -> Self {
        Self {
            ty,
            options: AttributeOptions {
                required: true,
                ..AttributeOptions::default()
            },
        }
    }

    /// Attaches a raw default, applied whenever the type loads no value.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.options.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.options.description = Some(description.into());
        self
    }

    pub fn ty(&self) -> &AttrType {
        &self.ty
    }

    pub fn options(&self) -> &AttributeOptions {
        &self.options
    }

    pub fn is_required(&self) -> bool {
        self.options.required
    }

    /// Loads a raw value through the type; when the type produces no value
    /// and a default is configured, the default is loaded instead.
    pub fn load(&self, value: Value, context: &Context, recurse: bool) -> Result<Option<Value>> {
        let mut loaded = self.ty.load(value, context, recurse)?;
        if loaded.is_none() {
            if let Some(default) = &self.options.default {
                loaded = self.ty.load(Value::from(default.clone()), context, false)?;
            }
        }
        Ok(loaded)
    }

    /// Validates a field's value, accumulating every error.
    pub fn validate(&self, value: Option<&Value>, context: &Context) -> Vec<String> {
        let mut guard = TraversalGuard::new();
        self.validate_inner(value, context, &mut guard)
    }

    pub(crate) fn validate_inner(
        &self,
        value: Option<&Value>,
        context: &Context,
        guard: &mut TraversalGuard,
    ) -> Vec<String> {
        match value {
            None | Some(Value::Null) => {
                if self.options.required {
                    vec![format!("Attribute {} is required", context)]
                } else {
                    vec![]
                }
            }
            Some(value) => self.ty.validate(value, context, guard),
        }
    }

    /// Dumps a field's loaded value to its plain representation.
    pub(crate) fn dump(&self, value: &Value, guard: &mut TraversalGuard) -> Result<serde_json::Value> {
        self.ty.dump(value, guard)
    }

    /// Produces a raw example value for this slot.
    pub fn example(&self, context: &Context) -> Result<Value> {
        self.ty.example(context)
    }

    /// Description tree: the type's description merged with the options.
    pub fn describe(&self, shallow: bool) -> Result<serde_json::Value> {
        let mut described = self.ty.describe(shallow)?;
        if let serde_json::Value::Object(obj) = &mut described {
            if self.options.required {
                obj.insert("required".to_string(), serde_json::json!(true));
            }
            if let Some(default) = &self.options.default {
                obj.insert("default".to_string(), default.clone());
            }
            if let Some(description) = &self.options.description {
                obj.insert("description".to_string(), serde_json::json!(description));
            }
        }
        Ok(described)
    }
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute")
            .field("type", &self.ty.name())
            .field("options", &self.options)
            .finish()
    }
}
