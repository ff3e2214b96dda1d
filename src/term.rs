use crate::error::EvalError;
use crate::functions::Functions;
use crate::subst::Substitution;
use crate::symbol::Symbol;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A fact's argument vector; always ground
pub type Tuple = Arc<[Term]>;

static FRESH_VARS: AtomicU64 = AtomicU64::new(1);

/// A logic variable. Source variables have id 0; fresh variables made
/// during rule normalization get a unique id so they never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Var {
    name: Arc<str>,
    id: u64,
}

impl Var {
    /// A named variable as written in a rule
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            id: 0,
        }
    }

    /// A variable distinct from every other variable ever created
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            name: Arc::from("_v"),
            id: FRESH_VARS.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The variable's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}%{}", self.name, self.id)
        }
    }
}

/// A primitive literal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// String
    Str(Arc<str>),
    /// Boolean
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// An immutable term tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Term {
    /// A variable (e.g. `x`)
    Var(Var),
    /// A constructor application (e.g. `cons(1, nil)`)
    Ctor {
        /// Constructor symbol
        symbol: Symbol,
        /// Arguments
        args: Arc<[Term]>,
    },
    /// A primitive literal (e.g. `42`, `"alice"`)
    Lit(Value),
    /// A call to a registered function, evaluated on normalization
    Call {
        /// Function symbol
        function: Symbol,
        /// Arguments
        args: Arc<[Term]>,
    },
}

impl Term {
    /// Variable term
    #[must_use]
    pub fn var(name: &str) -> Self {
        Term::Var(Var::new(name))
    }

    /// Integer literal
    #[must_use]
    pub fn int(i: i64) -> Self {
        Term::Lit(Value::Int(i))
    }

    /// String literal
    #[must_use]
    pub fn str(s: &str) -> Self {
        Term::Lit(Value::Str(Arc::from(s)))
    }

    /// Boolean literal
    #[must_use]
    pub fn bool(b: bool) -> Self {
        Term::Lit(Value::Bool(b))
    }

    /// Constructor application
    #[must_use]
    pub fn ctor(symbol: &str, args: Vec<Term>) -> Self {
        Term::Ctor {
            symbol: Symbol::new(symbol),
            args: args.into(),
        }
    }

    /// Function call
    #[must_use]
    pub fn call(function: &str, args: Vec<Term>) -> Self {
        Term::Call {
            function: Symbol::new(function),
            args: args.into(),
        }
    }

    /// The variable, if this term is one
    #[must_use]
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }

    /// The integer, if this term is an integer literal
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Lit(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// The boolean, if this term is a boolean literal
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Term::Lit(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Adds every variable of the term to `out`, in first-occurrence order
    pub fn collect_vars(&self, out: &mut IndexSet<Var>) {
        match self {
            Term::Var(v) => {
                out.insert(v.clone());
            }
            Term::Lit(_) => {}
            Term::Ctor { args, .. } | Term::Call { args, .. } => {
                for arg in args.iter() {
                    arg.collect_vars(out);
                }
            }
        }
    }

    /// The set of variables in the term
    #[must_use]
    pub fn vars(&self) -> IndexSet<Var> {
        let mut out = IndexSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// Counts every variable occurrence
    pub fn count_vars(&self, counts: &mut IndexMap<Var, usize>) {
        match self {
            Term::Var(v) => *counts.entry(v.clone()).or_insert(0) += 1,
            Term::Lit(_) => {}
            Term::Ctor { args, .. } | Term::Call { args, .. } => {
                for arg in args.iter() {
                    arg.count_vars(counts);
                }
            }
        }
    }

    /// True if the term contains no variables
    #[must_use]
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Lit(_) => true,
            Term::Ctor { args, .. } | Term::Call { args, .. } => args.iter().all(Term::is_ground),
        }
    }

    /// True if every variable of the term is in `bound`
    #[must_use]
    pub fn is_bound_by(&self, bound: &IndexSet<Var>) -> bool {
        match self {
            Term::Var(v) => bound.contains(v),
            Term::Lit(_) => true,
            Term::Ctor { args, .. } | Term::Call { args, .. } => {
                args.iter().all(|a| a.is_bound_by(bound))
            }
        }
    }

    /// True if the term calls a function accepted by `pred`
    pub fn mentions_function(&self, pred: &impl Fn(&Symbol) -> bool) -> bool {
        match self {
            Term::Var(_) | Term::Lit(_) => false,
            Term::Ctor { args, .. } => args.iter().any(|a| a.mentions_function(pred)),
            Term::Call { function, args } => {
                pred(function) || args.iter().any(|a| a.mentions_function(pred))
            }
        }
    }

    /// Replaces bound variables by their bindings without evaluating calls.
    /// Unbound variables stay in place.
    #[must_use]
    pub fn apply(&self, s: &Substitution) -> Term {
        match self {
            Term::Var(v) => s.get(v).cloned().unwrap_or_else(|| self.clone()),
            Term::Lit(_) => self.clone(),
            Term::Ctor { symbol, args } => Term::Ctor {
                symbol: symbol.clone(),
                args: args.iter().map(|a| a.apply(s)).collect(),
            },
            Term::Call { function, args } => Term::Call {
                function: function.clone(),
                args: args.iter().map(|a| a.apply(s)).collect(),
            },
        }
    }

    /// Instantiates the term under `s` and evaluates every function call,
    /// yielding a ground term.
    ///
    /// # Errors
    ///
    /// Fails if a variable is unbound or a function call fails.
    pub fn normalize(&self, s: &Substitution, fns: &Functions) -> Result<Term, EvalError> {
        Ok(self.rewrite(s, fns)?.unwrap_or_else(|| self.clone()))
    }

    /// One pass of [`Term::normalize`]. `None` means the term is already
    /// ground and call-free, so constructors share their argument slice.
    fn rewrite(&self, s: &Substitution, fns: &Functions) -> Result<Option<Term>, EvalError> {
        match self {
            Term::Var(v) => s
                .get(v)
                .cloned()
                .map(Some)
                .ok_or_else(|| EvalError::UnboundVariable(v.to_string())),
            Term::Lit(_) => Ok(None),
            Term::Ctor { symbol, args } => {
                let mut rewritten: Option<Vec<Term>> = None;
                for (i, arg) in args.iter().enumerate() {
                    match (arg.rewrite(s, fns)?, rewritten.as_mut()) {
                        (Some(new), Some(out)) => out.push(new),
                        (Some(new), None) => {
                            let mut out = Vec::with_capacity(args.len());
                            out.extend_from_slice(&args[..i]);
                            out.push(new);
                            rewritten = Some(out);
                        }
                        (None, Some(out)) => out.push(arg.clone()),
                        (None, None) => {}
                    }
                }
                Ok(rewritten.map(|args| Term::Ctor {
                    symbol: symbol.clone(),
                    args: args.into(),
                }))
            }
            Term::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|a| a.normalize(s, fns))
                    .collect::<Result<Vec<Term>, _>>()?;
                fns.call(function, &args).map(Some)
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Term]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Lit(v) => write!(f, "{v}"),
            Term::Ctor { symbol, args } => {
                write!(f, "{symbol}")?;
                if args.is_empty() {
                    Ok(())
                } else {
                    write_args(f, args)
                }
            }
            Term::Call { function, args } => {
                write!(f, "{function}")?;
                write_args(f, args)
            }
        }
    }
}

/// Formats a tuple of a relation as `rel(a, b)`
pub(crate) fn display_fact(name: &str, tuple: &[Term]) -> String {
    struct Fact<'a>(&'a str, &'a [Term]);
    impl fmt::Display for Fact<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)?;
            if self.1.is_empty() {
                Ok(())
            } else {
                write_args(f, self.1)
            }
        }
    }
    Fact(name, tuple).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_vars_are_distinct() {
        let a = Var::fresh();
        let b = Var::fresh();
        assert_ne!(a, b);
        assert_ne!(a, Var::new("_v"));
    }

    #[test]
    fn test_normalize_grounds_nested_terms() {
        let fns = Functions::with_builtins();
        let mut s = Substitution::new();
        s.put(Var::new("x"), Term::int(2));
        let t = Term::ctor(
            "pair",
            vec![Term::var("x"), Term::call("add", vec![Term::var("x"), Term::int(3)])],
        );
        let n = t.normalize(&s, &fns).unwrap();
        assert_eq!(n, Term::ctor("pair", vec![Term::int(2), Term::int(5)]));
        assert!(n.is_ground());
    }

    #[test]
    fn test_normalize_keeps_argument_order_when_rewriting_midway() {
        let fns = Functions::with_builtins();
        let mut s = Substitution::new();
        s.put(Var::new("x"), Term::int(2));
        let t = Term::ctor("f", vec![Term::int(1), Term::var("x"), Term::int(3)]);
        assert_eq!(
            t.normalize(&s, &fns).unwrap(),
            Term::ctor("f", vec![Term::int(1), Term::int(2), Term::int(3)])
        );
    }

    #[test]
    fn test_normalize_shares_ground_constructors() {
        let fns = Functions::with_builtins();
        let mut list = Term::ctor("nil", vec![]);
        for i in 0..200 {
            list = Term::ctor("cons", vec![Term::int(i), list]);
        }
        let n = list.normalize(&Substitution::new(), &fns).unwrap();
        assert_eq!(n, list);
        let (Term::Ctor { args: before, .. }, Term::Ctor { args: after, .. }) = (&list, &n) else {
            panic!("expected constructors");
        };
        assert!(Arc::ptr_eq(before, after), "Ground arguments are not copied");
    }

    #[test]
    fn test_normalize_fails_on_unbound_variable() {
        let fns = Functions::with_builtins();
        let s = Substitution::new();
        let err = Term::ctor("f", vec![Term::var("y")])
            .normalize(&s, &fns)
            .unwrap_err();
        assert_eq!(err, EvalError::UnboundVariable("y".to_string()));
    }

    #[test]
    fn test_apply_leaves_unbound_and_calls_in_place() {
        let mut s = Substitution::new();
        s.put(Var::new("x"), Term::int(1));
        let t = Term::call("add", vec![Term::var("x"), Term::var("y")]);
        assert_eq!(
            t.apply(&s),
            Term::call("add", vec![Term::int(1), Term::var("y")])
        );
    }

    #[test]
    fn test_count_vars_counts_occurrences() {
        let mut counts = IndexMap::new();
        Term::ctor("f", vec![Term::var("x"), Term::var("x"), Term::var("y")])
            .count_vars(&mut counts);
        assert_eq!(counts[&Var::new("x")], 2);
        assert_eq!(counts[&Var::new("y")], 1);
    }

    #[test]
    fn test_display() {
        let t = Term::ctor("cons", vec![Term::int(1), Term::ctor("nil", vec![])]);
        assert_eq!(t.to_string(), "cons(1, nil)");
        assert_eq!(display_fact("p", &[Term::str("a")]), "p(\"a\")");
    }
}
