use crate::error::EvalError;
use crate::functions::Functions;
use crate::subst::Substitution;
use crate::symbol::{RelationSymbol, Symbol};
use crate::term::{display_fact, Term, Var};
use indexmap::IndexSet;
use std::fmt;

/// How an argument position of a predicate is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Determined by earlier literals; part of the lookup key
    Bound,
    /// Determined by this literal; receives a value from the matched tuple
    Free,
    /// A singleton variable; the value is discarded
    Ignored,
}

impl BindingType {
    /// `Bound`?
    #[must_use]
    pub fn is_bound(self) -> bool {
        self == BindingType::Bound
    }

    /// `Free`?
    #[must_use]
    pub fn is_free(self) -> bool {
        self == BindingType::Free
    }

    /// `Ignored`?
    #[must_use]
    pub fn is_ignored(self) -> bool {
        self == BindingType::Ignored
    }
}

/// A relational atom in canonical form: every argument is a bound term, a
/// first occurrence of a variable, or a singleton variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimplePredicate {
    symbol: RelationSymbol,
    args: Vec<Term>,
    pattern: Vec<BindingType>,
    negated: bool,
    delta: bool,
}

impl SimplePredicate {
    pub(crate) fn new(
        symbol: RelationSymbol,
        args: Vec<Term>,
        pattern: Vec<BindingType>,
        negated: bool,
        delta: bool,
    ) -> Self {
        debug_assert_eq!(args.len(), pattern.len());
        Self {
            symbol,
            args,
            pattern,
            negated,
            delta,
        }
    }

    /// The relation looked up
    #[must_use]
    pub fn symbol(&self) -> &RelationSymbol {
        &self.symbol
    }

    /// Argument terms
    #[must_use]
    pub fn args(&self) -> &[Term] {
        &self.args
    }

    /// Binding mode of each argument
    #[must_use]
    pub fn pattern(&self) -> &[BindingType] {
        &self.pattern
    }

    /// Whether this is a negated (test-only) lookup
    #[must_use]
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Whether this occurrence reads the round's newly derived tuples
    /// instead of the full relation
    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.delta
    }

    /// Positions whose values form the lookup key
    #[must_use]
    pub fn bound_positions(&self) -> Vec<usize> {
        self.pattern
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.is_bound().then_some(i))
            .collect()
    }

    /// Lookup key: the normalized value at each bound position, `None` elsewhere.
    ///
    /// # Errors
    ///
    /// Propagates normalization faults.
    pub fn key(&self, s: &Substitution, fns: &Functions) -> Result<Vec<Option<Term>>, EvalError> {
        self.args
            .iter()
            .zip(&self.pattern)
            .map(|(arg, b)| {
                if b.is_bound() {
                    arg.normalize(s, fns).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    /// Binds the free positions from a matched tuple
    pub fn bind(&self, s: &mut Substitution, tuple: &[Term]) {
        for ((arg, b), value) in self.args.iter().zip(&self.pattern).zip(tuple) {
            if b.is_free() {
                if let Term::Var(v) = arg {
                    s.put(v.clone(), value.clone());
                }
            }
        }
    }
}

impl fmt::Display for SimplePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        let name = if self.delta {
            format!("{}[delta]", self.symbol)
        } else {
            self.symbol.to_string()
        };
        f.write_str(&display_fact(&name, &self.args))
    }
}

/// A canonical rule-body literal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimpleLiteral {
    /// Binds `var` to the value of `value`
    Assignment {
        /// Variable being defined
        var: Var,
        /// Bound term defining it
        value: Term,
    },
    /// Compares two bound terms
    Check {
        /// Left side
        lhs: Term,
        /// Right side
        rhs: Term,
        /// Disequality when set
        negated: bool,
    },
    /// Matches a bound term against a constructor shape
    Destructor {
        /// Bound term being matched
        scrutinee: Term,
        /// Expected constructor
        symbol: Symbol,
        /// Fresh variables receiving the constructor's arguments
        bindings: Vec<Var>,
    },
    /// Relational lookup
    Predicate(SimplePredicate),
}

impl SimpleLiteral {
    /// Evaluates an assignment.
    ///
    /// # Errors
    ///
    /// Propagates normalization faults.
    pub fn assign(var: &Var, value: &Term, s: &mut Substitution, fns: &Functions) -> Result<(), EvalError> {
        let v = value.normalize(s, fns)?;
        s.put(var.clone(), v);
        Ok(())
    }

    /// Evaluates an equality or disequality check.
    ///
    /// # Errors
    ///
    /// Propagates normalization faults.
    pub fn check(
        lhs: &Term,
        rhs: &Term,
        negated: bool,
        s: &Substitution,
        fns: &Functions,
    ) -> Result<bool, EvalError> {
        let equal = lhs.normalize(s, fns)? == rhs.normalize(s, fns)?;
        Ok(equal != negated)
    }

    /// Tries to match the scrutinee against `symbol(bindings...)`; on success
    /// binds each binding variable to the matching sub-term. A mismatch is a
    /// plain `false`, never a fault.
    ///
    /// # Errors
    ///
    /// Propagates normalization faults.
    pub fn destruct(
        scrutinee: &Term,
        symbol: &Symbol,
        bindings: &[Var],
        s: &mut Substitution,
        fns: &Functions,
    ) -> Result<bool, EvalError> {
        match scrutinee.normalize(s, fns)? {
            Term::Ctor { symbol: actual, args } if actual == *symbol && args.len() == bindings.len() => {
                for (var, arg) in bindings.iter().zip(args.iter()) {
                    s.put(var.clone(), arg.clone());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Variables mentioned by the literal
    #[must_use]
    pub fn vars(&self) -> IndexSet<Var> {
        let mut out = IndexSet::new();
        match self {
            SimpleLiteral::Assignment { var, value } => {
                out.insert(var.clone());
                value.collect_vars(&mut out);
            }
            SimpleLiteral::Check { lhs, rhs, .. } => {
                lhs.collect_vars(&mut out);
                rhs.collect_vars(&mut out);
            }
            SimpleLiteral::Destructor {
                scrutinee,
                bindings,
                ..
            } => {
                scrutinee.collect_vars(&mut out);
                out.extend(bindings.iter().cloned());
            }
            SimpleLiteral::Predicate(p) => {
                for arg in p.args() {
                    arg.collect_vars(&mut out);
                }
            }
        }
        out
    }

    /// True if evaluating the literal may call a function accepted by `pred`
    pub fn mentions_function(&self, pred: &impl Fn(&Symbol) -> bool) -> bool {
        match self {
            SimpleLiteral::Assignment { value, .. } => value.mentions_function(pred),
            SimpleLiteral::Check { lhs, rhs, .. } => {
                lhs.mentions_function(pred) || rhs.mentions_function(pred)
            }
            SimpleLiteral::Destructor { scrutinee, .. } => scrutinee.mentions_function(pred),
            SimpleLiteral::Predicate(p) => p.args().iter().any(|a| a.mentions_function(pred)),
        }
    }

    /// The predicate, if this literal is one
    #[must_use]
    pub fn as_predicate(&self) -> Option<&SimplePredicate> {
        match self {
            SimpleLiteral::Predicate(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for SimpleLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimpleLiteral::Assignment { var, value } => write!(f, "{var} := {value}"),
            SimpleLiteral::Check { lhs, rhs, negated } => {
                write!(f, "{lhs} {} {rhs}", if *negated { "!=" } else { "=" })
            }
            SimpleLiteral::Destructor {
                scrutinee,
                symbol,
                bindings,
            } => {
                write!(f, "{scrutinee} -> {symbol}(")?;
                for (i, v) in bindings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            SimpleLiteral::Predicate(p) => write!(f, "{p}"),
        }
    }
}
