use crate::term::{Term, Var};
use indexmap::IndexMap;

/// Variable bindings with overwrite semantics: binding a variable that is
/// already bound replaces the old value. A join path rebinds the same
/// variables every time it resumes, so no undo log is kept; a task that
/// branches hands its continuation an independent copy via [`Clone`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    bindings: IndexMap<Var, Term>,
}

impl Substitution {
    /// An empty substitution
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `var` to `term`, replacing any previous binding
    pub fn put(&mut self, var: Var, term: Term) {
        self.bindings.insert(var, term);
    }

    /// The binding of `var`, if any
    #[must_use]
    pub fn get(&self, var: &Var) -> Option<&Term> {
        self.bindings.get(var)
    }

    /// Whether `var` is bound
    #[must_use]
    pub fn contains(&self, var: &Var) -> bool {
        self.bindings.contains_key(var)
    }

    /// Number of bound variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if nothing is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterates over bindings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_overwrites() {
        let mut s = Substitution::new();
        let x = Var::new("x");
        s.put(x.clone(), Term::int(1));
        s.put(x.clone(), Term::int(2));
        assert_eq!(s.get(&x), Some(&Term::int(2)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut s = Substitution::new();
        let x = Var::new("x");
        s.put(x.clone(), Term::int(1));
        let mut branch = s.clone();
        branch.put(x.clone(), Term::int(7));
        branch.put(Var::new("y"), Term::int(8));
        assert_eq!(s.get(&x), Some(&Term::int(1)));
        assert!(!s.contains(&Var::new("y")));
        assert_eq!(branch.get(&x), Some(&Term::int(7)));
    }
}
