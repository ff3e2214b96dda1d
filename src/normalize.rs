//! Rule normalization.
//!
//! Turns a rule written as a head and a list of body literals into a
//! [`SimpleRule`]: a fixed sequence of assignments, checks, destructors and
//! predicates, each annotated with the binding mode of its arguments.
//!
//! Literals are processed left to right while tracking which variables are
//! already bound:
//!
//! - `lhs = rhs` with both sides bound becomes a [`SimpleLiteral::Check`].
//! - With one side bound and the other a variable, the variable is either
//!   substituted away or defined by an [`SimpleLiteral::Assignment`],
//!   depending on [`UnificationMode`].
//! - With one side bound and the other a constructor, a
//!   [`SimpleLiteral::Destructor`] binds fresh variables to the constructor
//!   arguments, which are then unified with the written arguments.
//! - With neither side bound, two constructors with the same symbol are
//!   unified argument by argument.
//! - An atom becomes a [`SimpleLiteral::Predicate`]; arguments that are
//!   neither bound nor a first occurrence of a variable are replaced by a
//!   fresh variable plus a queued unification.

use crate::config::UnificationMode;
use crate::error::ProgramError;
use crate::literal::{BindingType, SimpleLiteral, SimplePredicate};
use crate::rule::SimpleRule;
use crate::subst::Substitution;
use crate::symbol::{RelationKind, RelationSymbol};
use crate::term::{display_fact, Term, Var};
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// A relational atom as written in a rule (e.g. `edge(x, y)` or `!edge(x, y)`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    /// The relation
    pub symbol: RelationSymbol,
    /// The arguments
    pub terms: Vec<Term>,
    /// Whether the atom is negated
    pub negated: bool,
    pub(crate) delta: bool,
}

impl Atom {
    /// A positive atom
    #[must_use]
    pub fn new(symbol: RelationSymbol, terms: Vec<Term>) -> Self {
        Self {
            symbol,
            terms,
            negated: false,
            delta: false,
        }
    }

    /// The same atom, negated
    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn apply(&self, s: &Substitution) -> Self {
        Self {
            symbol: self.symbol.clone(),
            terms: self.terms.iter().map(|t| t.apply(s)).collect(),
            negated: self.negated,
            delta: self.delta,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str(&display_fact(self.symbol.name(), &self.terms))
    }
}

/// A body literal as written in a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// Relational atom
    Atom(Atom),
    /// Unification (`lhs = rhs`) or its negation (`lhs != rhs`)
    Unify {
        /// Left side
        lhs: Term,
        /// Right side
        rhs: Term,
        /// Disunification when set
        negated: bool,
    },
}

impl Literal {
    /// `lhs = rhs`
    #[must_use]
    pub fn eq(lhs: Term, rhs: Term) -> Self {
        Literal::Unify {
            lhs,
            rhs,
            negated: false,
        }
    }

    /// `lhs != rhs`
    #[must_use]
    pub fn neq(lhs: Term, rhs: Term) -> Self {
        Literal::Unify {
            lhs,
            rhs,
            negated: true,
        }
    }

    fn apply(&self, s: &Substitution) -> Self {
        match self {
            Literal::Atom(a) => Literal::Atom(a.apply(s)),
            Literal::Unify { lhs, rhs, negated } => Literal::Unify {
                lhs: lhs.apply(s),
                rhs: rhs.apply(s),
                negated: *negated,
            },
        }
    }

    fn count_vars(&self, counts: &mut IndexMap<Var, usize>) {
        match self {
            Literal::Atom(a) => a.terms.iter().for_each(|t| t.count_vars(counts)),
            Literal::Unify { lhs, rhs, .. } => {
                lhs.count_vars(counts);
                rhs.count_vars(counts);
            }
        }
    }
}

impl From<Atom> for Literal {
    fn from(atom: Atom) -> Self {
        Literal::Atom(atom)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Atom(a) => write!(f, "{a}"),
            Literal::Unify { lhs, rhs, negated } => {
                write!(f, "{lhs} {} {rhs}", if *negated { "!=" } else { "=" })
            }
        }
    }
}

/// A Datalog rule (e.g. `path(x, z) :- path(x, y), edge(y, z).`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    /// The conclusion
    pub head: Atom,
    /// The conditions, in written order
    pub body: Vec<Literal>,
}

impl Rule {
    /// Creates a rule
    #[must_use]
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    /// Occurrences of every variable across head and body
    #[must_use]
    pub fn count_variables(&self) -> IndexMap<Var, usize> {
        let mut counts = IndexMap::new();
        for t in &self.head.terms {
            t.count_vars(&mut counts);
        }
        for lit in &self.body {
            lit.count_vars(&mut counts);
        }
        counts
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for (i, lit) in self.body.iter().enumerate() {
            f.write_str(if i == 0 { " :- " } else { ", " })?;
            write!(f, "{lit}")?;
        }
        f.write_str(".")
    }
}

fn binding_pattern(
    args: &[Term],
    bound: &IndexSet<Var>,
    counts: &IndexMap<Var, usize>,
) -> Vec<BindingType> {
    args.iter()
        .map(|arg| match arg {
            Term::Var(v) if counts.get(v) == Some(&1) => BindingType::Ignored,
            _ if arg.is_bound_by(bound) => BindingType::Bound,
            _ => BindingType::Free,
        })
        .collect()
}

fn check_arity(atom: &Atom) -> Result<(), ProgramError> {
    if atom.terms.len() == atom.symbol.arity() {
        Ok(())
    } else {
        Err(ProgramError::ArityMismatch {
            atom: atom.to_string(),
            expected: atom.symbol.arity(),
            found: atom.terms.len(),
        })
    }
}

struct Simplifier<'r> {
    rule: &'r Rule,
    mode: UnificationMode,
    counts: IndexMap<Var, usize>,
    acc: Vec<SimpleLiteral>,
    bound: IndexSet<Var>,
    subst: Substitution,
}

impl<'r> Simplifier<'r> {
    fn new(rule: &'r Rule, mode: UnificationMode) -> Self {
        Self {
            rule,
            mode,
            counts: rule.count_variables(),
            acc: Vec::new(),
            bound: IndexSet::new(),
            subst: Substitution::new(),
        }
    }

    fn add(&mut self, lit: &Literal) -> Result<(), ProgramError> {
        let lit = lit.apply(&self.subst);
        let mut todo = Vec::new();
        let simple = match &lit {
            Literal::Unify { lhs, rhs, negated } => {
                self.unify(&lit, lhs, rhs, *negated, &mut todo)?
            }
            Literal::Atom(atom) => Some(self.predicate(atom, &mut todo)?),
        };
        if let Some(c) = simple {
            // A negated lookup only tests; it never binds.
            let binds = !matches!(&c, SimpleLiteral::Predicate(p) if p.is_negated());
            if binds {
                self.bound.extend(c.vars());
            }
            self.acc.push(c);
        }
        for x in &todo {
            self.add(x)?;
        }
        Ok(())
    }

    fn unify(
        &mut self,
        lit: &Literal,
        lhs: &Term,
        rhs: &Term,
        negated: bool,
        todo: &mut Vec<Literal>,
    ) -> Result<Option<SimpleLiteral>, ProgramError> {
        let left_bound = lhs.is_bound_by(&self.bound);
        let right_bound = rhs.is_bound_by(&self.bound);
        if negated && !(left_bound && right_bound) {
            return Err(ProgramError::NegatedUnificationUnbound {
                rule: self.rule.to_string(),
                conjunct: lit.to_string(),
            });
        }
        if left_bound && right_bound {
            return Ok(Some(SimpleLiteral::Check {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                negated,
            }));
        }
        if right_bound {
            return self.bind_side(lit, lhs, rhs, todo);
        }
        if left_bound {
            return self.bind_side(lit, rhs, lhs, todo);
        }
        match (lhs, rhs) {
            (
                Term::Ctor { symbol: s1, args: a1 },
                Term::Ctor { symbol: s2, args: a2 },
            ) => {
                if s1 != s2 || a1.len() != a2.len() {
                    return Err(ProgramError::UnsatisfiableUnification {
                        rule: self.rule.to_string(),
                        conjunct: lit.to_string(),
                    });
                }
                // Kept in argument order; reordering these is not type safe.
                todo.extend(
                    a1.iter()
                        .zip(a2.iter())
                        .map(|(x, y)| Literal::eq(x.clone(), y.clone())),
                );
                Ok(None)
            }
            _ => Err(ProgramError::NonInvertibleUnification {
                rule: self.rule.to_string(),
                conjunct: lit.to_string(),
            }),
        }
    }

    fn bind_side(
        &mut self,
        lit: &Literal,
        unbound: &Term,
        bound: &Term,
        todo: &mut Vec<Literal>,
    ) -> Result<Option<SimpleLiteral>, ProgramError> {
        match unbound {
            Term::Var(v) => {
                if self.mode == UnificationMode::Inline || matches!(bound, Term::Var(_)) {
                    self.subst.put(v.clone(), bound.clone());
                    Ok(None)
                } else {
                    Ok(Some(SimpleLiteral::Assignment {
                        var: v.clone(),
                        value: bound.clone(),
                    }))
                }
            }
            Term::Ctor { symbol, args } => {
                let bindings: Vec<Var> = args.iter().map(|_| Var::fresh()).collect();
                todo.extend(
                    bindings
                        .iter()
                        .zip(args.iter())
                        .map(|(y, arg)| Literal::eq(Term::Var(y.clone()), arg.clone())),
                );
                Ok(Some(SimpleLiteral::Destructor {
                    scrutinee: bound.clone(),
                    symbol: symbol.clone(),
                    bindings,
                }))
            }
            _ => Err(ProgramError::NonInvertibleUnification {
                rule: self.rule.to_string(),
                conjunct: lit.to_string(),
            }),
        }
    }

    fn predicate(&mut self, atom: &Atom, todo: &mut Vec<Literal>) -> Result<SimpleLiteral, ProgramError> {
        check_arity(atom)?;
        if atom.symbol.kind() == RelationKind::TopDown {
            return Err(ProgramError::Unsupported {
                rule: self.rule.to_string(),
                reason: format!("{} is a top-down relation", atom.symbol),
            });
        }
        let mut seen = IndexSet::new();
        let mut args = Vec::with_capacity(atom.terms.len());
        for arg in &atom.terms {
            match arg {
                _ if arg.is_bound_by(&self.bound) => args.push(arg.clone()),
                Term::Var(v) if seen.insert(v.clone()) => args.push(arg.clone()),
                _ => {
                    let y = Var::fresh();
                    todo.push(Literal::eq(Term::Var(y.clone()), arg.clone()));
                    args.push(Term::Var(y));
                }
            }
        }
        let pattern = binding_pattern(&args, &self.bound, &self.counts);
        if atom.negated && pattern.iter().any(|b| b.is_free()) {
            return Err(ProgramError::UnsafeNegation {
                rule: self.rule.to_string(),
                atom: atom.to_string(),
            });
        }
        Ok(SimpleLiteral::Predicate(SimplePredicate::new(
            atom.symbol.clone(),
            args,
            pattern,
            atom.negated,
            atom.delta,
        )))
    }
}

/// Compiles a rule into canonical form.
///
/// # Errors
///
/// Fails with a [`ProgramError`] naming the rule and the offending literal
/// if the rule is invalid: unbound head variables, unsatisfiable or
/// non-invertible unifications, negations over unbound variables, arity
/// mismatches, or relations that cannot be evaluated bottom-up.
pub fn simplify(rule: &Rule, mode: UnificationMode) -> Result<SimpleRule, ProgramError> {
    check_arity(&rule.head)?;
    if rule.head.symbol.kind() != RelationKind::BottomUp || rule.head.negated {
        return Err(ProgramError::Unsupported {
            rule: rule.to_string(),
            reason: format!("{} is not a derivable bottom-up relation", rule.head),
        });
    }
    let mut simplifier = Simplifier::new(rule, mode);
    for lit in &rule.body {
        simplifier.add(lit)?;
    }
    let head = rule.head.apply(&simplifier.subst);
    let unbound: Vec<String> = head
        .terms
        .iter()
        .flat_map(Term::vars)
        .filter(|v| !simplifier.bound.contains(v))
        .collect::<IndexSet<Var>>()
        .iter()
        .map(ToString::to_string)
        .collect();
    if !unbound.is_empty() {
        return Err(ProgramError::UnboundHeadVariables {
            rule: rule.to_string(),
            vars: unbound.join(", "),
        });
    }
    let pattern = binding_pattern(&head.terms, &simplifier.bound, &simplifier.counts);
    let head = SimplePredicate::new(head.symbol, head.terms, pattern, false, false);
    Ok(SimpleRule::new(head, simplifier.acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> RelationSymbol {
        RelationSymbol::extensional("edge", 2)
    }

    fn path() -> RelationSymbol {
        RelationSymbol::intensional("path", 2)
    }

    fn atom(sym: &RelationSymbol, vars: &[&str]) -> Atom {
        Atom::new(sym.clone(), vars.iter().map(|v| Term::var(v)).collect())
    }

    #[test]
    fn test_transitive_rule_binding_patterns() {
        let rule = Rule::new(
            atom(&path(), &["x", "z"]),
            vec![
                atom(&path(), &["x", "y"]).into(),
                atom(&edge(), &["y", "z"]).into(),
            ],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        assert_eq!(simple.body().len(), 2);
        let p0 = simple.body()[0].as_predicate().unwrap();
        let p1 = simple.body()[1].as_predicate().unwrap();
        assert_eq!(p0.pattern(), &[BindingType::Free, BindingType::Free]);
        assert_eq!(p1.pattern(), &[BindingType::Bound, BindingType::Free]);
        assert_eq!(simple.head().pattern(), &[BindingType::Bound, BindingType::Bound]);
    }

    #[test]
    fn test_singleton_variable_is_ignored() {
        let rule = Rule::new(
            Atom::new(RelationSymbol::intensional("src", 1), vec![Term::var("x")]),
            vec![atom(&edge(), &["x", "unused"]).into()],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        let p = simple.body()[0].as_predicate().unwrap();
        assert_eq!(p.pattern(), &[BindingType::Free, BindingType::Ignored]);
    }

    #[test]
    fn test_repeated_variable_becomes_check() {
        let rule = Rule::new(
            Atom::new(RelationSymbol::intensional("self_loop", 1), vec![Term::var("x")]),
            vec![atom(&edge(), &["x", "x"]).into()],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        assert_eq!(simple.body().len(), 2);
        let p = simple.body()[0].as_predicate().unwrap();
        assert_eq!(p.pattern(), &[BindingType::Free, BindingType::Free]);
        assert!(matches!(
            simple.body()[1],
            SimpleLiteral::Check { negated: false, .. }
        ));
    }

    #[test]
    fn test_constant_argument_is_bound() {
        let rule = Rule::new(
            Atom::new(RelationSymbol::intensional("from_one", 1), vec![Term::var("y")]),
            vec![Atom::new(edge(), vec![Term::int(1), Term::var("y")]).into()],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        let p = simple.body()[0].as_predicate().unwrap();
        assert_eq!(p.pattern(), &[BindingType::Bound, BindingType::Free]);
    }

    #[test]
    fn test_unbound_head_variable_is_rejected() {
        let rule = Rule::new(
            atom(&path(), &["x", "w"]),
            vec![atom(&edge(), &["x", "y"]).into()],
        );
        let err = simplify(&rule, UnificationMode::Assign).unwrap_err();
        assert!(matches!(err, ProgramError::UnboundHeadVariables { ref vars, .. } if vars == "w"));
    }

    #[test]
    fn test_mismatched_constructors_are_unsatisfiable() {
        let rule = Rule::new(
            atom(&path(), &["x", "y"]),
            vec![
                atom(&edge(), &["x", "y"]).into(),
                Literal::eq(
                    Term::ctor("f", vec![Term::var("a")]),
                    Term::ctor("g", vec![Term::var("b")]),
                ),
            ],
        );
        let err = simplify(&rule, UnificationMode::Assign).unwrap_err();
        assert!(matches!(err, ProgramError::UnsatisfiableUnification { ref conjunct, .. } if conjunct == "f(a) = g(b)"));
    }

    #[test]
    fn test_negated_unification_requires_bound_sides() {
        let rule = Rule::new(
            atom(&path(), &["x", "y"]),
            vec![
                Literal::neq(Term::var("x"), Term::var("z")),
                atom(&edge(), &["x", "y"]).into(),
            ],
        );
        assert!(matches!(
            simplify(&rule, UnificationMode::Assign),
            Err(ProgramError::NegatedUnificationUnbound { .. })
        ));
    }

    #[test]
    fn test_negated_atom_cannot_bind() {
        let rule = Rule::new(
            Atom::new(RelationSymbol::intensional("q", 1), vec![Term::var("x")]),
            vec![
                Atom::new(RelationSymbol::extensional("node", 1), vec![Term::var("x")]).into(),
                atom(&edge(), &["x", "y"]).negate().into(),
                Literal::eq(Term::var("y"), Term::var("y")),
            ],
        );
        assert!(matches!(
            simplify(&rule, UnificationMode::Assign),
            Err(ProgramError::UnsafeNegation { .. })
        ));
    }

    #[test]
    fn test_destructor_binds_constructor_arguments() {
        let wrapped = RelationSymbol::extensional("wrapped", 1);
        let first = RelationSymbol::intensional("first", 1);
        let rule = Rule::new(
            Atom::new(first, vec![Term::var("a")]),
            vec![
                Atom::new(wrapped, vec![Term::var("t")]).into(),
                Literal::eq(
                    Term::var("t"),
                    Term::ctor("pair", vec![Term::var("a"), Term::var("b")]),
                ),
            ],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        assert_eq!(simple.body().len(), 2);
        let SimpleLiteral::Destructor { symbol, bindings, .. } = &simple.body()[1] else {
            panic!("expected a destructor, got {}", simple.body()[1]);
        };
        assert_eq!(symbol.as_str(), "pair");
        assert_eq!(bindings.len(), 2);
        // `a` was renamed to the destructor's first binding.
        assert_eq!(simple.head().args()[0], Term::Var(bindings[0].clone()));
    }

    #[test]
    fn test_assign_versus_inline() {
        let num = RelationSymbol::extensional("num", 1);
        let succ = RelationSymbol::intensional("succ", 1);
        let rule = Rule::new(
            Atom::new(succ, vec![Term::var("y")]),
            vec![
                Atom::new(num, vec![Term::var("x")]).into(),
                Literal::eq(
                    Term::var("y"),
                    Term::call("add", vec![Term::var("x"), Term::int(1)]),
                ),
            ],
        );
        let assigned = simplify(&rule, UnificationMode::Assign).unwrap();
        assert!(matches!(
            assigned.body()[1],
            SimpleLiteral::Assignment { .. }
        ));
        let inlined = simplify(&rule, UnificationMode::Inline).unwrap();
        assert_eq!(inlined.body().len(), 1);
        assert_eq!(
            inlined.head().args()[0],
            Term::call("add", vec![Term::var("x"), Term::int(1)])
        );
    }

    #[test]
    fn test_same_constructor_unification_decomposes() {
        let num = RelationSymbol::extensional("num", 1);
        let out = RelationSymbol::intensional("out", 2);
        let rule = Rule::new(
            Atom::new(out, vec![Term::var("a"), Term::var("b")]),
            vec![
                Atom::new(num, vec![Term::var("x")]).into(),
                Literal::eq(
                    Term::ctor("p", vec![Term::var("a"), Term::int(3)]),
                    Term::ctor("p", vec![Term::var("x"), Term::var("b")]),
                ),
            ],
        );
        let simple = simplify(&rule, UnificationMode::Assign).unwrap();
        // `a = x` folds into the substitution, `3 = b` becomes an assignment.
        assert_eq!(simple.body().len(), 2);
        assert!(matches!(
            &simple.body()[1],
            SimpleLiteral::Assignment { var, value } if var == &Var::new("b") && value == &Term::int(3)
        ));
        assert_eq!(simple.head().args(), &[Term::var("x"), Term::var("b")]);
    }

    #[test]
    fn test_arity_mismatch() {
        let rule = Rule::new(
            atom(&path(), &["x", "y"]),
            vec![Atom::new(edge(), vec![Term::var("x")]).into()],
        );
        assert!(matches!(
            simplify(&rule, UnificationMode::Assign),
            Err(ProgramError::ArityMismatch { expected: 2, found: 1, .. })
        ));
    }
}
