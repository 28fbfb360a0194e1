//! Context paths for load and validation diagnostics.
//!
//! Every error produced by the engine carries the full path of field and
//! index segments accumulated from the root call, so errors from deeply
//! nested containers remain attributable: `$.key(address).key(zip)`.

use std::fmt;

use rand::Rng;

/// Root segment for a freshly-started load/validate/dump call graph.
pub const ROOT_SEGMENT: &str = "$";

/// An accumulating path of `key(name)`, `at(index)`, and `value(..)`
/// segments attached to every diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    segments: Vec<String>,
}

impl Context {
    /// The default root context, `$`.
    pub fn root() -> Self {
        Self {
            segments: vec![ROOT_SEGMENT.to_string()],
        }
    }

    /// A root context with a custom first segment.
    pub fn named(root: impl Into<String>) -> Self {
        Self {
            segments: vec![root.into()],
        }
    }

    /// A root context for example generation, tagged with the type name
    /// and a random discriminator so interleaved example trees stay
    /// distinguishable in logs.
    pub fn example_root(type_name: &str) -> Self {
        let tag = rand::thread_rng().gen_range(0..10_000_000);
        Self::named(format!("{}-{}", type_name, tag))
    }

    /// Extends the path with a `key(name)` segment.
    pub fn key(&self, name: impl fmt::Display) -> Self {
        self.push(format!("key({})", name))
    }

    /// Extends the path with an `at(index)` segment.
    pub fn at(&self, index: usize) -> Self {
        self.push(format!("at({})", index))
    }

    /// Extends the path with a `value(..)` segment, used when validating
    /// the values of generic containers.
    pub fn value(&self, rendered: impl fmt::Display) -> Self {
        self.push(format!("value({})", rendered))
    }

    /// Number of segments on the path. Example generation uses this to
    /// bound recursion on self-referential schemas.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    fn push(&self, segment: String) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_renders_dollar() {
        assert_eq!(Context::root().to_string(), "$");
    }

    #[test]
    fn test_segments_accumulate() {
        let ctx = Context::root().key("address").key("zip").at(3);
        assert_eq!(ctx.to_string(), "$.key(address).key(zip).at(3)");
        assert_eq!(ctx.depth(), 4);
    }

    #[test]
    fn test_extension_does_not_mutate_parent() {
        let parent = Context::root().key("a");
        let _child = parent.key("b");
        assert_eq!(parent.to_string(), "$.key(a)");
    }

    #[test]
    fn test_example_root_carries_type_name() {
        let ctx = Context::example_root("User");
        assert!(ctx.to_string().starts_with("User-"));
    }
}
