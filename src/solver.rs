//! Constraint-solver boundary.
//!
//! The engine never talks to a concrete solver; it calls [`Solver::check`]
//! from the `is_sat` family of functions. Implementations may be slow, so
//! [`CachingSolver`] memoises answers keyed by the exact assertion set.

use crate::error::EvalError;
use crate::term::{Term, Var};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Satisfying assignment returned when a model was requested
pub type Model = IndexMap<Var, Term>;

/// Outcome of a satisfiability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverResult {
    /// Satisfiable, with a model if one was asked for
    Sat(Option<Model>),
    /// Unsatisfiable
    Unsat,
    /// The solver gave up (timeout or incompleteness)
    Unknown,
}

/// A constraint solver usable from concurrently running tasks
pub trait Solver: Send + Sync {
    /// Decides the conjunction of `assertions`.
    ///
    /// # Errors
    ///
    /// Fails if the solver itself breaks; an undecided query is
    /// [`SolverResult::Unknown`], not an error.
    fn check(
        &self,
        assertions: &[Term],
        want_model: bool,
        timeout: Option<Duration>,
    ) -> Result<SolverResult, EvalError>;
}

/// Memoises another solver's answers
pub struct CachingSolver<S> {
    inner: S,
    cache: DashMap<(Vec<Term>, bool), SolverResult>,
    hits: AtomicUsize,
}

impl<S: Solver> CachingSolver<S> {
    /// Wraps `inner`
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            hits: AtomicUsize::new(0),
        }
    }

    /// Number of queries answered from the cache
    pub fn cache_hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// The wrapped solver
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> fmt::Debug for CachingSolver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingSolver")
            .field("entries", &self.cache.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: Solver> Solver for CachingSolver<S> {
    fn check(
        &self,
        assertions: &[Term],
        want_model: bool,
        timeout: Option<Duration>,
    ) -> Result<SolverResult, EvalError> {
        let key = (assertions.to_vec(), want_model);
        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }
        let result = self.inner.check(assertions, want_model, timeout)?;
        // Unknown may be a timeout; a later try could do better.
        if result != SolverResult::Unknown {
            self.cache.insert(key, result.clone());
        }
        Ok(result)
    }
}
