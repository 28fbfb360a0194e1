//! Cross-field requirements.
//!
//! A requirement constrains which members of a named field group may hold
//! a value at the same time. Requirements are evaluated after per-field
//! validation, against the set of declared fields currently holding a
//! non-null value, and their errors use the same context-path formatting
//! as field errors so both interleave legibly.

use serde::Serialize;

use crate::context::Context;

/// The kind of constraint a requirement applies to its field group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// Every field in the group must hold a value.
    All,
    /// At least `n` fields of the group must hold a value.
    AtLeast(usize),
    /// At most `n` fields of the group may hold a value.
    AtMost(usize),
    /// Exactly `n` fields of the group must hold a value.
    Exactly(usize),
    /// At most one field of the group may hold a value.
    Exclusive,
}

impl RequirementKind {
    /// Short label used in descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            RequirementKind::All => "all",
            RequirementKind::AtLeast(_) => "at_least",
            RequirementKind::AtMost(_) => "at_most",
            RequirementKind::Exactly(_) => "exactly",
            RequirementKind::Exclusive => "exclusive",
        }
    }

    /// The count parameter, when the kind carries one.
    pub fn count(&self) -> Option<usize> {
        match self {
            RequirementKind::AtLeast(n)
            | RequirementKind::AtMost(n)
            | RequirementKind::Exactly(n) => Some(*n),
            _ => None,
        }
    }
}

/// A named cross-field constraint over a group of declared fields.
///
/// `fields = None` means the requirement spans every declared field of the
/// owning schema; the group is resolved by the container at evaluation
/// time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    kind: RequirementKind,
    fields: Option<Vec<String>>,
}

impl Requirement {
    pub fn new(kind: RequirementKind, fields: Option<Vec<String>>) -> Self {
        Self { kind, fields }
    }

    pub fn all<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RequirementKind::All, Some(collect(fields)))
    }

    pub fn at_least<I, S>(n: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RequirementKind::AtLeast(n), Some(collect(fields)))
    }

    pub fn at_most<I, S>(n: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RequirementKind::AtMost(n), Some(collect(fields)))
    }

    pub fn exactly<I, S>(n: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RequirementKind::Exactly(n), Some(collect(fields)))
    }

    pub fn exclusive<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RequirementKind::Exclusive, Some(collect(fields)))
    }

    /// A requirement spanning all declared fields of the owning schema.
    pub fn spanning(kind: RequirementKind) -> Self {
        Self::new(kind, None)
    }

    pub fn kind(&self) -> RequirementKind {
        self.kind
    }

    /// The declared field group, if the requirement names one.
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// Resolves the group this requirement constrains.
    pub fn group<'a>(&'a self, schema_fields: &'a [String]) -> &'a [String] {
        self.fields.as_deref().unwrap_or(schema_fields)
    }

    /// Evaluates the requirement against the fields currently holding a
    /// value, restricted to its group.
    pub fn validate(
        &self,
        present: &[String],
        schema_fields: &[String],
        context: &Context,
    ) -> Vec<String> {
        let group = self.group(schema_fields);
        let hits: Vec<&String> = group.iter().filter(|name| present.contains(*name)).collect();

        match self.kind {
            RequirementKind::All => group
                .iter()
                .filter(|name| !present.contains(*name))
                .map(|name| format!("Key {} is required for {}", name, context))
                .collect(),
            RequirementKind::Exactly(n) if hits.len() != n => vec![format!(
                "Exactly {} key(s) out of [{}] are required for {}. Found {} instead",
                n,
                group.join(", "),
                context,
                hits.len()
            )],
            RequirementKind::AtLeast(n) if hits.len() < n => vec![format!(
                "At least {} key(s) out of [{}] are required for {}. Found {} instead",
                n,
                group.join(", "),
                context,
                hits.len()
            )],
            RequirementKind::AtMost(n) if hits.len() > n => vec![format!(
                "At most {} key(s) out of [{}] may be passed in for {}. Found {} instead",
                n,
                group.join(", "),
                context,
                hits.len()
            )],
            RequirementKind::Exclusive if hits.len() > 1 => vec![format!(
                "Keys [{}] are mutually exclusive for {}. Found {} of them present",
                group.join(", "),
                context,
                hits.len()
            )],
            _ => vec![],
        }
    }

    /// Description tree for tooling and example selection.
    pub fn describe(&self) -> serde_json::Value {
        let mut described = serde_json::json!({ "type": self.kind.label() });
        if let Some(n) = self.kind.count() {
            described["count"] = serde_json::json!(n);
        }
        if let Some(fields) = &self.fields {
            described["attributes"] = serde_json::json!(fields);
        }
        described
    }
}

fn collect<I, S>(fields: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_reports_one_error_per_missing_name() {
        let req = Requirement::all(["a", "b", "c"]);
        let errors = req.validate(&present(&["b"]), &[], &Context::root());
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Key a is required"));
        assert!(errors[1].contains("Key c is required"));
    }

    #[test]
    fn test_exactly_compares_count() {
        let req = Requirement::exactly(1, ["a", "b"]);
        assert!(req
            .validate(&present(&["a"]), &[], &Context::root())
            .is_empty());

        let errors = req.validate(&present(&["a", "b"]), &[], &Context::root());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Exactly 1"));
        assert!(errors[0].contains("Found 2"));
    }

    #[test]
    fn test_at_least_and_at_most() {
        let at_least = Requirement::at_least(2, ["a", "b", "c"]);
        assert_eq!(
            at_least
                .validate(&present(&["a"]), &[], &Context::root())
                .len(),
            1
        );
        assert!(at_least
            .validate(&present(&["a", "c"]), &[], &Context::root())
            .is_empty());

        let at_most = Requirement::at_most(1, ["a", "b"]);
        assert!(at_most
            .validate(&present(&[]), &[], &Context::root())
            .is_empty());
        assert_eq!(
            at_most
                .validate(&present(&["a", "b"]), &[], &Context::root())
                .len(),
            1
        );
    }

    #[test]
    fn test_exclusive_allows_at_most_one() {
        let req = Requirement::exclusive(["a", "b"]);
        assert!(req
            .validate(&present(&["b"]), &[], &Context::root())
            .is_empty());

        let errors = req.validate(&present(&["a", "b"]), &[], &Context::root());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("mutually exclusive"));
    }

    #[test]
    fn test_spanning_requirement_uses_schema_fields() {
        let req = Requirement::spanning(RequirementKind::AtLeast(1));
        let schema_fields = present(&["x", "y"]);
        let errors = req.validate(&[], &schema_fields, &Context::root());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("[x, y]"));
    }

    #[test]
    fn test_errors_carry_context_path() {
        let req = Requirement::exclusive(["a", "b"]);
        let ctx = Context::root().key("payload");
        let errors = req.validate(&present(&["a", "b"]), &[], &ctx);
        assert!(errors[0].contains("$.key(payload)"));
    }

    #[test]
    fn test_describe_shape() {
        let described = Requirement::exactly(2, ["a", "b", "c"]).describe();
        assert_eq!(described["type"], "exactly");
        assert_eq!(described["count"], 2);
        assert_eq!(described["attributes"], serde_json::json!(["a", "b", "c"]));
    }
}
