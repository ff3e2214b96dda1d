use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// An interned-by-sharing name for constructors and functions (e.g. `cons`, `add`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Creates a symbol from its name
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The symbol's name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the facts of a relation come to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RelationKind {
    /// Base (extensional) relation: facts are supplied, never derived
    Extensional,
    /// Derived (intensional) relation, evaluated bottom-up
    BottomUp,
    /// Derived relation meant for top-down evaluation; not run by the fixpoint engine
    TopDown,
}

/// Identifies a relation (e.g. `edge/2`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RelationSymbol {
    name: Arc<str>,
    arity: usize,
    kind: RelationKind,
}

impl RelationSymbol {
    /// Creates a relation symbol
    #[must_use]
    pub fn new(name: &str, arity: usize, kind: RelationKind) -> Self {
        Self {
            name: Arc::from(name),
            arity,
            kind,
        }
    }

    /// Shorthand for an extensional relation
    #[must_use]
    pub fn extensional(name: &str, arity: usize) -> Self {
        Self::new(name, arity, RelationKind::Extensional)
    }

    /// Shorthand for a bottom-up intensional relation
    #[must_use]
    pub fn intensional(name: &str, arity: usize) -> Self {
        Self::new(name, arity, RelationKind::BottomUp)
    }

    /// The relation's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments every tuple of this relation has
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Whether the relation is extensional, bottom-up or top-down
    #[must_use]
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// True for relations populated only by supplied facts
    #[must_use]
    pub fn is_extensional(&self) -> bool {
        self.kind == RelationKind::Extensional
    }

    /// True for relations computed by rules
    #[must_use]
    pub fn is_intensional(&self) -> bool {
        !self.is_extensional()
    }
}

impl fmt::Display for RelationSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_symbol_identity_includes_arity() {
        let a = RelationSymbol::intensional("p", 1);
        let b = RelationSymbol::intensional("p", 2);
        assert_ne!(a, b);
        assert_eq!(a, RelationSymbol::intensional("p", 1));
    }

    #[test]
    fn test_relation_kind_flags() {
        let edge = RelationSymbol::extensional("edge", 2);
        assert!(edge.is_extensional());
        let path = RelationSymbol::intensional("path", 2);
        assert!(path.is_intensional());
        assert_eq!(path.kind(), RelationKind::BottomUp);
        assert_eq!(path.to_string(), "path");
    }
}
