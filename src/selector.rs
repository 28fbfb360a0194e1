//! Example field selection.
//!
//! When a schema carries `exactly`/`at_most`/`exclusive` requirements, a
//! naive "populate every field" example violates them. The selector picks
//! a representative subset of fields that still satisfies the declared
//! requirements. It is intentionally conservative: any conflict it cannot
//! resolve is reported as an error, and the container falls back to
//! populating all fields rather than failing example generation outright.

use indexmap::IndexSet;
use thiserror::Error;

use crate::requirement::{Requirement, RequirementKind};

/// Conflicts the selector cannot resolve.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("field group [{0}] holds {1} values but the requirement caps it at {2}")]
    OverFilled(String, usize, usize),

    #[error("field group [{0}] cannot reach {1} selectable members")]
    Insufficient(String, usize),

    #[error("field {0} is required by one requirement and excluded by another")]
    RequiredButBanned(String),
}

/// Picks the subset of fields an example should populate.
///
/// Fields with caller-supplied explicit values are always kept. Each
/// requirement is processed in declaration order against an accepted set
/// and a banned set; unconstrained fields are accepted afterwards.
pub struct SmartAttributeSelector<'a> {
    requirements: &'a [Requirement],
    fields: &'a [String],
    accepted: IndexSet<String>,
    banned: IndexSet<String>,
}

impl<'a> SmartAttributeSelector<'a> {
    pub fn new(
        requirements: &'a [Requirement],
        fields: &'a [String],
        explicit: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        Self {
            requirements,
            fields,
            accepted: explicit.into_iter().cloned().collect(),
            banned: IndexSet::new(),
        }
    }

    /// Runs the selection, returning chosen field names in schema order.
    pub fn process(mut self) -> Result<Vec<String>, SelectorError> {
        for requirement in self.requirements {
            self.apply(requirement)?;
        }
        self.accept_remaining();

        Ok(self
            .fields
            .iter()
            .filter(|name| self.accepted.contains(*name))
            .cloned()
            .collect())
    }

    fn apply(&mut self, requirement: &Requirement) -> Result<(), SelectorError> {
        let group: Vec<String> = requirement.group(self.fields).to_vec();
        match requirement.kind() {
            RequirementKind::All => self.accept_all(&group),
            RequirementKind::AtLeast(n) => self.top_up(&group, n, false),
            RequirementKind::Exactly(n) => self.top_up(&group, n, true),
            RequirementKind::AtMost(n) => self.cap(&group, n),
            RequirementKind::Exclusive => self.cap(&group, 1),
        }
    }

    fn accept_all(&mut self, group: &[String]) -> Result<(), SelectorError> {
        for name in group {
            if self.banned.contains(name) {
                return Err(SelectorError::RequiredButBanned(name.clone()));
            }
            self.accepted.insert(name.clone());
        }
        Ok(())
    }

    /// Accepts members of `group` until `n` are accepted; with `exact`,
    /// additionally bans the unchosen remainder so later defaults cannot
    /// overfill the group.
    fn top_up(&mut self, group: &[String], n: usize, exact: bool) -> Result<(), SelectorError> {
        let mut have = self.hits(group);
        if exact && have > n {
            return Err(SelectorError::OverFilled(group.join(", "), have, n));
        }

        for name in group {
            if have >= n {
                break;
            }
            if self.accepted.contains(name) || self.banned.contains(name) {
                continue;
            }
            self.accepted.insert(name.clone());
            have += 1;
        }
        if have < n {
            return Err(SelectorError::Insufficient(group.join(", "), n));
        }

        if exact {
            self.ban_unaccepted(group);
        }
        Ok(())
    }

    /// Accepts up to `n` members of `group` and bans the remainder.
    fn cap(&mut self, group: &[String], n: usize) -> Result<(), SelectorError> {
        let have = self.hits(group);
        if have > n {
            return Err(SelectorError::OverFilled(group.join(", "), have, n));
        }

        let mut have = have;
        for name in group {
            if have >= n {
                break;
            }
            if self.accepted.contains(name) || self.banned.contains(name) {
                continue;
            }
            self.accepted.insert(name.clone());
            have += 1;
        }
        self.ban_unaccepted(group);
        Ok(())
    }

    fn accept_remaining(&mut self) {
        for name in self.fields {
            if !self.banned.contains(name) {
                self.accepted.insert(name.clone());
            }
        }
    }

    fn ban_unaccepted(&mut self, group: &[String]) {
        for name in group {
            if !self.accepted.contains(name) {
                self.banned.insert(name.clone());
            }
        }
    }

    fn hits(&self, group: &[String]) -> usize {
        group
            .iter()
            .filter(|name| self.accepted.contains(*name))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn select(
        requirements: &[Requirement],
        all: &[String],
        explicit: &[String],
    ) -> Result<Vec<String>, SelectorError> {
        SmartAttributeSelector::new(requirements, all, explicit.iter()).process()
    }

    #[test]
    fn test_no_requirements_selects_everything() {
        let all = fields(&["a", "b", "c"]);
        let selected = select(&[], &all, &[]).unwrap();
        assert_eq!(selected, all);
    }

    #[test]
    fn test_exclusive_keeps_one_member() {
        let all = fields(&["a", "b", "c"]);
        let reqs = [Requirement::exclusive(["a", "b"])];
        let selected = select(&reqs, &all, &[]).unwrap();
        assert_eq!(selected, fields(&["a", "c"]));
    }

    #[test]
    fn test_exclusive_respects_explicit_value() {
        let all = fields(&["a", "b"]);
        let reqs = [Requirement::exclusive(["a", "b"])];
        let explicit = fields(&["b"]);
        let selected = select(&reqs, &all, &explicit).unwrap();
        assert_eq!(selected, fields(&["b"]));
    }

    #[test]
    fn test_exactly_tops_up_and_bans_rest() {
        let all = fields(&["a", "b", "c", "d"]);
        let reqs = [Requirement::exactly(2, ["a", "b", "c"])];
        let selected = select(&reqs, &all, &[]).unwrap();
        assert_eq!(selected, fields(&["a", "b", "d"]));
    }

    #[test]
    fn test_exactly_overfilled_by_explicit_values_errors() {
        let all = fields(&["a", "b", "c"]);
        let reqs = [Requirement::exactly(1, ["a", "b"])];
        let explicit = fields(&["a", "b"]);
        let err = select(&reqs, &all, &explicit).unwrap_err();
        assert!(matches!(err, SelectorError::OverFilled(_, 2, 1)));
    }

    #[test]
    fn test_at_least_does_not_ban() {
        let all = fields(&["a", "b", "c"]);
        let reqs = [Requirement::at_least(1, ["a", "b"])];
        let selected = select(&reqs, &all, &[]).unwrap();
        assert_eq!(selected, all);
    }

    #[test]
    fn test_at_most_zero_bans_whole_group() {
        let all = fields(&["a", "b", "c"]);
        let reqs = [Requirement::at_most(0, ["a", "b"])];
        let selected = select(&reqs, &all, &[]).unwrap();
        assert_eq!(selected, fields(&["c"]));
    }

    #[test]
    fn test_conflicting_all_after_exclusive_errors() {
        let all = fields(&["a", "b"]);
        let reqs = [
            Requirement::exclusive(["a", "b"]),
            Requirement::all(["a", "b"]),
        ];
        let err = select(&reqs, &all, &[]).unwrap_err();
        assert!(matches!(err, SelectorError::RequiredButBanned(_)));
    }

    #[test]
    fn test_insufficient_candidates_errors() {
        let all = fields(&["a", "b"]);
        let reqs = [Requirement::exactly(3, ["a", "b"])];
        let err = select(&reqs, &all, &[]).unwrap_err();
        assert!(matches!(err, SelectorError::Insufficient(_, 3)));
    }

    #[test]
    fn test_selection_preserves_schema_order() {
        let all = fields(&["z", "a", "m"]);
        let selected = select(&[], &all, &[]).unwrap();
        assert_eq!(selected, all);
    }
}
