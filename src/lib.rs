//! # Fixlog
//!
//! A parallel, stratum-by-stratum semi-naive Datalog fixpoint engine.
//!
//! ## Features
//!
//! - Rule normalization into canonical literal sequences
//! - Semi-naive evaluation with per-relation delta rules
//! - Join tasks split into batches and run on a work-stealing pool
//! - Eager, generation-bounded dispatch of freshly derived tuples
//! - Stratified negation, user functions and an optional constraint solver
//!
//! ## Example
//!
//! ```rust
//! use fixlog::{Atom, Engine, RelationSymbol, Rule, Term};
//!
//! let edge = RelationSymbol::extensional("edge", 2);
//! let path = RelationSymbol::intensional("path", 2);
//! let atom = |rel: &RelationSymbol, a: &str, b: &str| {
//!     Atom::new(rel.clone(), vec![Term::var(a), Term::var(b)])
//! };
//!
//! let mut engine = Engine::new();
//! engine.add_fact(Atom::new(edge.clone(), vec![Term::int(1), Term::int(2)])).unwrap();
//! engine.add_fact(Atom::new(edge.clone(), vec![Term::int(2), Term::int(3)])).unwrap();
//! engine
//!     .add_stratum(vec![
//!         Rule::new(atom(&path, "x", "y"), vec![atom(&edge, "x", "y").into()]),
//!         Rule::new(
//!             atom(&path, "x", "z"),
//!             vec![atom(&path, "x", "y").into(), atom(&edge, "y", "z").into()],
//!         ),
//!     ])
//!     .unwrap();
//! engine.run().unwrap();
//! assert_eq!(engine.get_facts("path").len(), 3);
//! ```

pub mod config;
pub mod db;
/// Multi-stratum driver and queries.
pub mod engine;
pub mod error;
pub mod eval;
pub mod functions;
/// Canonical literals.
pub mod literal;
pub mod normalize;
pub mod pool;
/// Compiled rules.
pub mod rule;
pub mod solver;
/// Variable bindings.
pub mod subst;
/// Relation and function names.
pub mod symbol;
/// Terms and tuples.
pub mod term;

pub use config::{EvalConfig, UnificationMode};
pub use db::{FactStore, IndexCatalog, IndexId, IndexedFactDb};
pub use engine::{Engine, QueryResult};
pub use error::{EngineError, EvalError, ProgramError};
pub use eval::{EvalEnv, EvalState, EvalStats, EvalSummary, RuleTiming, StratumEvaluator};
pub use functions::Functions;
pub use literal::{BindingType, SimpleLiteral, SimplePredicate};
pub use normalize::{Atom, Literal, Rule};
pub use pool::TaskPool;
pub use rule::{IndexedRule, SimpleRule, StratumRules};
pub use solver::{CachingSolver, Solver, SolverResult};
pub use subst::Substitution;
pub use symbol::{RelationKind, RelationSymbol, Symbol};
pub use term::{Term, Tuple, Value, Var};
