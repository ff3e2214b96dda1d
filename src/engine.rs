use crate::config::EvalConfig;
use crate::db::{FactStore, IndexId, IndexedFactDb};
use crate::error::{EngineError, ProgramError};
use crate::eval::{EvalEnv, EvalStats, EvalSummary, StratumEvaluator};
use crate::functions::Functions;
use crate::normalize::{Atom, Rule};
use crate::pool::TaskPool;
use crate::rule::StratumRules;
use crate::symbol::RelationSymbol;
use crate::term::{Term, Tuple, Var};
use crossbeam_channel::Sender;
use indexmap::{IndexMap, IndexSet};

/// Result of a query - a set of variable bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Variable bindings that satisfy the query
    pub bindings: IndexMap<Var, Term>,
}

impl QueryResult {
    /// The value bound to the source variable `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings.get(&Var::new(name))
    }
}

/// Binds the variables of `pattern` so that it equals `value`
fn match_term(pattern: &Term, value: &Term, bindings: &mut IndexMap<Var, Term>) -> bool {
    match (pattern, value) {
        (Term::Var(v), _) => match bindings.get(v) {
            Some(bound) => bound == value,
            None => {
                bindings.insert(v.clone(), value.clone());
                true
            }
        },
        (
            Term::Ctor { symbol, args },
            Term::Ctor {
                symbol: value_symbol,
                args: value_args,
            },
        ) => {
            symbol == value_symbol
                && args.len() == value_args.len()
                && args
                    .iter()
                    .zip(value_args.iter())
                    .all(|(p, v)| match_term(p, v, bindings))
        }
        _ => pattern == value,
    }
}

/// Multi-stratum evaluation driver.
///
/// Facts go in with [`Engine::add_fact`], rules with [`Engine::add_stratum`]
/// (strata are evaluated in the order they were added), and [`Engine::run`]
/// computes every stratum's fixpoint on a shared worker pool.
#[derive(Debug)]
pub struct Engine {
    db: IndexedFactDb,
    strata: Vec<StratumRules>,
    functions: Functions,
    config: EvalConfig,
    pool: Option<TaskPool>,
    tracked: IndexSet<RelationSymbol>,
    echo: Option<Sender<String>>,
    stats: EvalStats,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create a new engine with default settings and the built-in functions
    #[must_use]
    pub fn new() -> Self {
        let config = EvalConfig::default();
        Self {
            db: IndexedFactDb::new(),
            strata: Vec::new(),
            functions: Functions::with_builtins(),
            stats: EvalStats::new(config.record_work),
            config,
            pool: None,
            tracked: IndexSet::new(),
            echo: None,
        }
    }

    /// Create an engine configured from `fixlog.toml` and `FIXLOG_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Fails if the configuration cannot be loaded or is invalid.
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self::new().with_config(EvalConfig::load()?))
    }

    /// Replaces the settings. The unification mode applies to strata added
    /// afterwards.
    #[must_use]
    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.stats = EvalStats::new(config.record_work);
        self.pool = None;
        self.config = config;
        self
    }

    /// Replaces the function registry. Call before adding strata whose rules
    /// use the functions, since split hints are computed when a stratum is
    /// added.
    #[must_use]
    pub fn with_functions(mut self, functions: Functions) -> Self {
        self.functions = functions;
        self
    }

    /// Current settings
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Add a ground fact; returns whether it was new.
    ///
    /// # Errors
    ///
    /// Rejects atoms with variables or calls, negated atoms, and atoms whose
    /// argument count differs from the relation's arity.
    pub fn add_fact(&mut self, atom: Atom) -> Result<bool, ProgramError> {
        if atom.terms.len() != atom.symbol.arity() {
            return Err(ProgramError::ArityMismatch {
                atom: atom.to_string(),
                expected: atom.symbol.arity(),
                found: atom.terms.len(),
            });
        }
        let ground = atom
            .terms
            .iter()
            .all(|t| t.is_ground() && !t.mentions_function(&|_| true));
        if atom.negated || !ground {
            return Err(ProgramError::NonGroundFact {
                atom: atom.to_string(),
            });
        }
        Ok(self.db.add(&atom.symbol, atom.terms.into()))
    }

    /// Compiles `rules` into the next stratum and returns its number.
    ///
    /// # Errors
    ///
    /// Fails on the first rule that cannot be normalized; the stratum is
    /// not added.
    pub fn add_stratum(&mut self, rules: Vec<Rule>) -> Result<usize, ProgramError> {
        let planned = StratumRules::plan(&rules, self.config.unification, &self.db, &self.functions)?;
        log::debug!(
            "stratum {}: {} base rules, {} recursive relations",
            self.strata.len(),
            planned.base().len(),
            planned.recursive().len()
        );
        Ok(self.add_planned_stratum(planned))
    }

    /// Adds a stratum whose base and recursive rules were partitioned
    /// elsewhere
    pub fn add_planned_stratum(&mut self, rules: StratumRules) -> usize {
        self.strata.push(rules);
        self.strata.len() - 1
    }

    /// Echo every new tuple of `rel` as a `[TRACKED]` line
    pub fn track(&mut self, rel: RelationSymbol) {
        self.tracked.insert(rel);
    }

    /// Also send echoed lines to `tx`
    pub fn echo_to(&mut self, tx: Sender<String>) {
        self.echo = Some(tx);
    }

    /// Evaluate every stratum to its fixpoint, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first stratum whose evaluation faults. Facts derived
    /// before the fault stay in the database.
    pub fn run(&mut self) -> Result<EvalSummary, EngineError> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => TaskPool::new(self.config.parallelism).map_err(EngineError::Pool)?,
        };
        let result = self.run_strata(&pool);
        self.pool = Some(pool);
        result
    }

    fn run_strata(&self, pool: &TaskPool) -> Result<EvalSummary, EngineError> {
        let before = self.stats.summary();
        let env = EvalEnv {
            db: &self.db,
            pool,
            fns: &self.functions,
            config: &self.config,
            tracked: &self.tracked,
            echo: self.echo.as_ref(),
            stats: &self.stats,
        };
        for (stratum, rules) in self.strata.iter().enumerate() {
            StratumEvaluator::new(stratum, rules, env)
                .evaluate()
                .map_err(|source| EngineError::Stratum { stratum, source })?;
        }
        Ok(self.stats.summary().since(before))
    }

    /// All facts of `rel`, sorted
    #[must_use]
    pub fn facts(&self, rel: &RelationSymbol) -> Vec<Tuple> {
        self.db.facts(rel)
    }

    /// All facts of every relation named `name`, sorted
    #[must_use]
    pub fn get_facts(&self, name: &str) -> Vec<Tuple> {
        let mut out: Vec<Tuple> = self
            .db
            .relations()
            .iter()
            .filter(|rel| rel.name() == name)
            .flat_map(|rel| self.db.facts(rel))
            .collect();
        out.sort();
        out
    }

    /// Returns all variable bindings that make the pattern true.
    #[must_use]
    pub fn query(&self, pattern: &Atom) -> Vec<QueryResult> {
        let key: Vec<Option<Term>> = pattern
            .terms
            .iter()
            .map(|t| t.is_ground().then(|| t.clone()))
            .collect();
        let mut tuples = self.db.lookup(&pattern.symbol, &key, IndexId::SCAN);
        tuples.sort();
        tuples
            .iter()
            .filter_map(|tuple| {
                let mut bindings = IndexMap::new();
                pattern
                    .terms
                    .iter()
                    .zip(tuple.iter())
                    .all(|(p, v)| match_term(p, v, &mut bindings))
                    .then_some(QueryResult { bindings })
            })
            .collect()
    }

    /// Returns whether a binding exists
    #[must_use]
    pub fn ask(&self, pattern: &Atom) -> bool {
        !self.query(pattern).is_empty()
    }

    /// Counters accumulated over every run
    #[must_use]
    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    /// The underlying fact database
    #[must_use]
    pub fn db(&self) -> &IndexedFactDb {
        &self.db
    }

    /// Every relation as JSON
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.db.to_json()
    }
}
