//! Engine error types.
//!
//! Loading fails fast: a malformed container cannot be meaningfully
//! partially loaded, so the first error wins and is returned through
//! `Result`. Validation never fails fast; it accumulates plain message
//! strings (see `StructuredMap::validate`) so a caller sees every problem
//! in one pass. Both channels carry the full context path.

use thiserror::Error;

use crate::context::Context;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading values or defining schemas.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// The input shape fundamentally cannot be interpreted as the target
    /// type (e.g. an integer offered to a keyed container).
    #[error("cannot interpret {source_kind} as {target} while loading {context}")]
    IncompatibleType {
        context: Context,
        source_kind: String,
        target: String,
    },

    /// The input shape is right but its content failed to parse
    /// (malformed JSON text, bad date, bad UUID).
    #[error("error deserializing {encoding} into {target} while loading {context}: {reason}")]
    Deserialization {
        context: Context,
        encoding: &'static str,
        target: String,
        reason: String,
    },

    /// Structurally valid input carries a key the schema does not permit.
    #[error("unknown key {key} received while loading {context}")]
    UnknownKey { context: Context, key: String },

    /// Illegal option combination or bad requirement, detected once at
    /// schema-definition time and re-surfaced on every later use of the
    /// broken type.
    #[error("invalid definition for type {type_name}: {reason}")]
    InvalidDefinition { type_name: String, reason: String },
}

impl Error {
    /// Creates an incompatible-type error.
    pub fn incompatible(
        context: &Context,
        source_kind: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Error::IncompatibleType {
            context: context.clone(),
            source_kind: source_kind.into(),
            target: target.into(),
        }
    }

    /// Creates a deserialization error for a parse failure.
    pub fn deserialization(
        context: &Context,
        encoding: &'static str,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Deserialization {
            context: context.clone(),
            encoding,
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown-key error.
    pub fn unknown_key(context: &Context, key: impl Into<String>) -> Self {
        Error::UnknownKey {
            context: context.clone(),
            key: key.into(),
        }
    }

    /// Creates a definition error.
    pub fn definition(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDefinition {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a definition-time fault (as opposed to a fault in
    /// the loaded data).
    pub fn is_definition(&self) -> bool {
        matches!(self, Error::InvalidDefinition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_message_carries_path() {
        let ctx = Context::root().key("payload").key("extra");
        let err = Error::unknown_key(&ctx, "extra");
        let rendered = err.to_string();
        assert!(rendered.contains("extra"));
        assert!(rendered.contains("$.key(payload).key(extra)"));
    }

    #[test]
    fn test_incompatible_type_names_both_sides() {
        let err = Error::incompatible(&Context::root(), "integer", "Struct");
        let rendered = err.to_string();
        assert!(rendered.contains("integer"));
        assert!(rendered.contains("Struct"));
    }

    #[test]
    fn test_definition_fault_is_flagged() {
        let err = Error::definition("User", "bad requirement");
        assert!(err.is_definition());
        assert!(!Error::unknown_key(&Context::root(), "x").is_definition());
    }
}
