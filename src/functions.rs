//! Functions callable from rule terms.
//!
//! A [`Term::Call`] is evaluated when the term is normalized. The registry
//! holds the built-in arithmetic and comparison functions, any native
//! functions the embedder registers, and the solver-backed `is_sat` family.

use crate::error::EvalError;
use crate::solver::{Solver, SolverResult};
use crate::symbol::Symbol;
use crate::term::{Term, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Native implementation of a function over ground arguments
pub type NativeFn = dyn Fn(&[Term]) -> Result<Term, EvalError> + Send + Sync;

#[derive(Clone)]
struct FunctionDef {
    arity: usize,
    body: Arc<NativeFn>,
    expensive: bool,
}

/// Registry of callable functions
#[derive(Clone, Default)]
pub struct Functions {
    defs: IndexMap<Symbol, FunctionDef>,
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.defs.keys()).finish()
    }
}

fn int_arg(name: &str, t: &Term) -> Result<i64, EvalError> {
    t.as_int().ok_or_else(|| EvalError::Function {
        name: name.to_string(),
        message: format!("expected an integer, got {t}"),
    })
}

fn overflow(name: &str) -> EvalError {
    EvalError::Function {
        name: name.to_string(),
        message: "integer overflow".to_string(),
    }
}

impl Functions {
    /// A registry with no functions at all
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in functions
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut fns = Self::new();
        fns.int_binop("add", i64::checked_add);
        fns.int_binop("sub", i64::checked_sub);
        fns.int_binop("mul", i64::checked_mul);
        fns.int_binop("div", |a, b| if b == 0 { None } else { a.checked_div(b) });
        fns.int_binop("rem", |a, b| if b == 0 { None } else { a.checked_rem(b) });
        fns.int_cmp("lt", |a, b| a < b);
        fns.int_cmp("le", |a, b| a <= b);
        fns.int_cmp("gt", |a, b| a > b);
        fns.int_cmp("ge", |a, b| a >= b);
        fns.register("neg", 1, |args| {
            let a = int_arg("neg", &args[0])?;
            a.checked_neg().map(Term::int).ok_or_else(|| overflow("neg"))
        });
        fns.register("concat", 2, |args| match (&args[0], &args[1]) {
            (Term::Lit(Value::Str(a)), Term::Lit(Value::Str(b))) => {
                Ok(Term::str(&format!("{a}{b}")))
            }
            (a, b) => Err(EvalError::Function {
                name: "concat".to_string(),
                message: format!("expected two strings, got {a} and {b}"),
            }),
        });
        fns
    }

    fn int_binop(&mut self, name: &'static str, op: fn(i64, i64) -> Option<i64>) {
        self.register(name, 2, move |args| {
            let a = int_arg(name, &args[0])?;
            let b = int_arg(name, &args[1])?;
            op(a, b).map(Term::int).ok_or_else(|| {
                if b == 0 && matches!(name, "div" | "rem") {
                    EvalError::Function {
                        name: name.to_string(),
                        message: "division by zero".to_string(),
                    }
                } else {
                    overflow(name)
                }
            })
        });
    }

    fn int_cmp(&mut self, name: &'static str, op: fn(i64, i64) -> bool) {
        self.register(name, 2, move |args| {
            let a = int_arg(name, &args[0])?;
            let b = int_arg(name, &args[1])?;
            Ok(Term::bool(op(a, b)))
        });
    }

    /// Registers (or replaces) a cheap native function
    pub fn register<F>(&mut self, name: &str, arity: usize, body: F)
    where
        F: Fn(&[Term]) -> Result<Term, EvalError> + Send + Sync + 'static,
    {
        self.insert(name, arity, Arc::new(body), false);
    }

    /// Registers a function whose calls are costly; join positions feeding
    /// such calls are split into smaller batches.
    pub fn register_expensive<F>(&mut self, name: &str, arity: usize, body: F)
    where
        F: Fn(&[Term]) -> Result<Term, EvalError> + Send + Sync + 'static,
    {
        self.insert(name, arity, Arc::new(body), true);
    }

    fn insert(&mut self, name: &str, arity: usize, body: Arc<NativeFn>, expensive: bool) {
        self.defs.insert(
            Symbol::new(name),
            FunctionDef {
                arity,
                body,
                expensive,
            },
        );
    }

    /// Registers `is_sat(formula) -> bool` and `is_sat_opt(formula) ->
    /// some(bool) | none` backed by `solver`
    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn Solver>, timeout: Option<Duration>) -> Self {
        let s = Arc::clone(&solver);
        self.register_expensive("is_sat", 1, move |args| {
            match s.check(args, false, timeout)? {
                SolverResult::Sat(_) => Ok(Term::bool(true)),
                SolverResult::Unsat => Ok(Term::bool(false)),
                SolverResult::Unknown => Err(EvalError::SolverUnknown(args[0].to_string())),
            }
        });
        self.register_expensive("is_sat_opt", 1, move |args| {
            Ok(match solver.check(args, false, timeout)? {
                SolverResult::Sat(_) => Term::ctor("some", vec![Term::bool(true)]),
                SolverResult::Unsat => Term::ctor("some", vec![Term::bool(false)]),
                SolverResult::Unknown => Term::ctor("none", vec![]),
            })
        });
        self
    }

    /// Whether a function named `name` is registered
    #[must_use]
    pub fn contains(&self, name: &Symbol) -> bool {
        self.defs.contains_key(name)
    }

    /// Whether calls to `name` are marked expensive
    #[must_use]
    pub fn is_expensive(&self, name: &Symbol) -> bool {
        self.defs.get(name).is_some_and(|d| d.expensive)
    }

    /// Applies `name` to ground arguments.
    ///
    /// # Errors
    ///
    /// Unknown function, wrong arity, or whatever the function reports.
    pub fn call(&self, name: &Symbol, args: &[Term]) -> Result<Term, EvalError> {
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if def.arity != args.len() {
            return Err(EvalError::FunctionArity {
                name: name.to_string(),
                expected: def.arity,
                found: args.len(),
            });
        }
        (def.body)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::tests::ToySolver;

    #[test]
    fn test_builtin_arithmetic() {
        let fns = Functions::with_builtins();
        let add = Symbol::new("add");
        assert_eq!(fns.call(&add, &[Term::int(2), Term::int(3)]), Ok(Term::int(5)));
        assert_eq!(
            fns.call(&Symbol::new("lt"), &[Term::int(2), Term::int(3)]),
            Ok(Term::bool(true))
        );
        assert!(!fns.is_expensive(&add));
    }

    #[test]
    fn test_division_by_zero_is_a_fault() {
        let fns = Functions::with_builtins();
        let err = fns
            .call(&Symbol::new("div"), &[Term::int(1), Term::int(0)])
            .unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let fns = Functions::with_builtins();
        assert_eq!(
            fns.call(&Symbol::new("nope"), &[]),
            Err(EvalError::UnknownFunction("nope".to_string()))
        );
        assert!(matches!(
            fns.call(&Symbol::new("add"), &[Term::int(1)]),
            Err(EvalError::FunctionArity { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_is_sat_uses_solver() {
        let fns = Functions::with_builtins().with_solver(Arc::new(ToySolver::default()), None);
        let is_sat = Symbol::new("is_sat");
        assert!(fns.is_expensive(&is_sat));
        assert_eq!(
            fns.call(&is_sat, &[Term::ctor("false", vec![])]),
            Ok(Term::bool(false))
        );
        assert!(matches!(
            fns.call(&is_sat, &[Term::ctor("unknown", vec![])]),
            Err(EvalError::SolverUnknown(_))
        ));
        assert_eq!(
            fns.call(&Symbol::new("is_sat_opt"), &[Term::ctor("unknown", vec![])]),
            Ok(Term::ctor("none", vec![]))
        );
    }
}
