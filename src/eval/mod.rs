//! Stratum evaluation.
//!
//! A [`StratumEvaluator`] computes the fixpoint of one stratum. It first runs
//! every base rule once. It then runs rounds: the tuples newly derived into
//! each recursive relation's delta set during the previous round seed the
//! rules keyed on that relation. Evaluation stops after a round that had
//! nothing to seed.
//!
//! Within a round, work is split into join tasks (see [`task`]) that run on a
//! shared [`TaskPool`]. New tuples of recursive relations either seed new
//! tasks right away or wait in the delta set for the next round (see
//! [`batching`]).

pub(crate) mod batching;
pub(crate) mod task;

use crate::config::EvalConfig;
use crate::db::FactStore;
use crate::error::EvalError;
use crate::functions::Functions;
use crate::pool::TaskPool;
use crate::rule::{IndexedRule, StratumRules};
use crate::symbol::RelationSymbol;
use crate::term::{display_fact, Term, Tuple};
use crossbeam_channel::Sender;
use dashmap::{DashMap, DashSet};
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use task::PrefixTask;

/// Newly derived tuples per recursive relation; lives for one round
pub(crate) type DeltaSets = IndexMap<RelationSymbol, DashSet<Tuple>>;

fn fresh_deltas(rules: &StratumRules) -> DeltaSets {
    rules
        .recursive_relations()
        .map(|rel| (rel.clone(), DashSet::new()))
        .collect()
}

/// Lifecycle of a [`StratumEvaluator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    /// Created, not yet started
    Initializing,
    /// Running the base rules
    BaseRound,
    /// Running delta-seeded rounds
    RecursiveRounds {
        /// 1-based round number
        round: usize,
    },
    /// Fixpoint reached
    Done,
    /// A task raised a fault
    Failed,
}

/// Snapshot of [`EvalStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    /// Join tasks scheduled
    pub tasks: usize,
    /// Rounds run, the base round included
    pub rounds: usize,
    /// Tuples that were new to the store
    pub new_facts: usize,
    /// Derivations of tuples already stored (only with `record_work`)
    pub duplicates: usize,
    /// Tuples bound by lookups (only with `record_work`)
    pub work: usize,
}

impl EvalSummary {
    /// Counts accumulated since `before`
    #[must_use]
    pub fn since(self, before: EvalSummary) -> EvalSummary {
        EvalSummary {
            tasks: self.tasks.saturating_sub(before.tasks),
            rounds: self.rounds.saturating_sub(before.rounds),
            new_facts: self.new_facts.saturating_sub(before.new_facts),
            duplicates: self.duplicates.saturating_sub(before.duplicates),
            work: self.work.saturating_sub(before.work),
        }
    }
}

impl fmt::Display for EvalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rounds, {} tasks, {} new facts, {} duplicates, {} tuples bound",
            self.rounds, self.tasks, self.new_facts, self.duplicates, self.work
        )
    }
}

/// Time spent in one rule's join tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleTiming {
    /// Deterministic prefix up to the first lookup
    pub prefix: Duration,
    /// Lookups and everything after them
    pub suffix: Duration,
}

impl RuleTiming {
    /// Prefix plus suffix
    #[must_use]
    pub fn total(&self) -> Duration {
        self.prefix + self.suffix
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Phase {
    Prefix,
    Suffix,
}

/// Evaluation counters, updated concurrently by join tasks
#[derive(Debug, Default)]
pub struct EvalStats {
    record_work: bool,
    tasks: AtomicUsize,
    rounds: AtomicUsize,
    new_facts: AtomicUsize,
    duplicates: AtomicUsize,
    work: AtomicUsize,
    timings: DashMap<String, RuleTiming>,
}

impl EvalStats {
    /// Counters that also track work, duplicates and per-rule time when
    /// `record_work` is set
    #[must_use]
    pub fn new(record_work: bool) -> Self {
        Self {
            record_work,
            ..Self::default()
        }
    }

    /// Current values
    #[must_use]
    pub fn summary(&self) -> EvalSummary {
        EvalSummary {
            tasks: self.tasks.load(Ordering::Relaxed),
            rounds: self.rounds.load(Ordering::Relaxed),
            new_facts: self.new_facts.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            work: self.work.load(Ordering::Relaxed),
        }
    }

    /// Per-rule time, most expensive first
    #[must_use]
    pub fn timings(&self) -> Vec<(String, RuleTiming)> {
        let mut out: Vec<(String, RuleTiming)> = self
            .timings
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort_by(|a, b| b.1.total().cmp(&a.1.total()));
        out
    }

    pub(crate) fn task(&self) {
        self.tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn round(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn new_fact(&self) {
        self.new_facts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        if self.record_work {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn bound_tuple(&self) {
        if self.record_work {
            self.work.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn start(&self) -> Option<Instant> {
        self.record_work.then(Instant::now)
    }

    pub(crate) fn record(&self, rule: &IndexedRule, phase: Phase, started: Option<Instant>) {
        let Some(started) = started else { return };
        let elapsed = started.elapsed();
        let mut timing = self.timings.entry(rule.to_string()).or_default();
        match phase {
            Phase::Prefix => timing.prefix += elapsed,
            Phase::Suffix => timing.suffix += elapsed,
        }
    }
}

/// Everything a join task reads during one round
pub(crate) struct RoundCx<'e> {
    pub(crate) db: &'e dyn FactStore,
    pub(crate) fns: &'e Functions,
    pub(crate) config: &'e EvalConfig,
    pub(crate) recursive: &'e IndexMap<RelationSymbol, Vec<IndexedRule>>,
    pub(crate) deltas: &'e DeltaSets,
    pub(crate) tracked: &'e IndexSet<RelationSymbol>,
    pub(crate) echo: Option<&'e Sender<String>>,
    pub(crate) stats: &'e EvalStats,
}

impl RoundCx<'_> {
    /// Target number of tuples per task for the lookup at `pos`
    pub(crate) fn batch_size(&self, rule: &IndexedRule, pos: usize) -> usize {
        if rule.should_split(pos) {
            self.config.smt_task_size
        } else {
            self.config.task_size
        }
    }

    pub(crate) fn echo_if_tracked(&self, rel: &RelationSymbol, tuple: &[Term]) {
        if !self.tracked.contains(rel) {
            return;
        }
        let line = format!("[TRACKED] {}", display_fact(rel.name(), tuple));
        log::info!(target: "fixlog::tracked", "{line}");
        if let Some(tx) = self.echo {
            // The listener may have hung up; derivation goes on regardless.
            let _ = tx.send(line);
        }
    }
}

/// Shared services a [`StratumEvaluator`] runs against
#[derive(Clone, Copy)]
pub struct EvalEnv<'e> {
    /// Fact store read and extended by the rules
    pub db: &'e dyn FactStore,
    /// Workers running the join tasks
    pub pool: &'e TaskPool,
    /// Functions callable from rule terms
    pub fns: &'e Functions,
    /// Batch sizes and generation bound
    pub config: &'e EvalConfig,
    /// Relations whose new tuples are echoed
    pub tracked: &'e IndexSet<RelationSymbol>,
    /// Optional listener for echoed tuples
    pub echo: Option<&'e Sender<String>>,
    /// Counters to update
    pub stats: &'e EvalStats,
}

impl fmt::Debug for EvalEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalEnv")
            .field("pool", self.pool)
            .field("config", self.config)
            .field("tracked", self.tracked)
            .finish_non_exhaustive()
    }
}

/// Computes the fixpoint of one stratum
#[derive(Debug)]
pub struct StratumEvaluator<'e> {
    stratum: usize,
    rules: &'e StratumRules,
    env: EvalEnv<'e>,
    state: EvalState,
}

impl<'e> StratumEvaluator<'e> {
    /// An evaluator for stratum number `stratum`
    #[must_use]
    pub fn new(stratum: usize, rules: &'e StratumRules, env: EvalEnv<'e>) -> Self {
        Self {
            stratum,
            rules,
            env,
            state: EvalState::Initializing,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EvalState {
        self.state
    }

    /// Runs the stratum to its fixpoint. On success the store holds every
    /// tuple derivable by the stratum's rules.
    ///
    /// # Errors
    ///
    /// The first fault raised by any join task. Tuples committed before the
    /// fault stay in the store.
    pub fn evaluate(&mut self) -> Result<EvalSummary, EvalError> {
        let before = self.env.stats.summary();
        match self.run() {
            Ok(()) => {
                self.transition(EvalState::Done);
                let summary = self.env.stats.summary().since(before);
                log::info!("stratum {} reached fixpoint: {summary}", self.stratum);
                Ok(summary)
            }
            Err(err) => {
                self.transition(EvalState::Failed);
                log::warn!("stratum {} failed: {err}", self.stratum);
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: EvalState) {
        log::debug!("stratum {}: {:?} -> {next:?}", self.stratum, self.state);
        self.state = next;
    }

    fn run(&mut self) -> Result<(), EvalError> {
        let rules = self.rules;
        let mut deltas = fresh_deltas(rules);

        self.transition(EvalState::BaseRound);
        let seeds = rules.base().iter().map(|rule| (rule, None)).collect();
        self.run_round(&deltas, seeds)?;

        let mut round = 0;
        loop {
            // Tasks of the next round write into fresh sets; the drained ones
            // become this round's seeds.
            let drained = std::mem::replace(&mut deltas, fresh_deltas(rules));
            let mut seeds = Vec::new();
            for (rel, set) in drained {
                if set.is_empty() {
                    continue;
                }
                let tuples: Arc<[Tuple]> = set.into_iter().collect();
                log::debug!(
                    "stratum {}: {} new {} tuples",
                    self.stratum,
                    tuples.len(),
                    rel
                );
                for rule in rules.recursive().get(&rel).into_iter().flatten() {
                    seeds.push((rule, Some(Arc::clone(&tuples))));
                }
            }
            if seeds.is_empty() {
                return Ok(());
            }
            round += 1;
            self.transition(EvalState::RecursiveRounds { round });
            self.run_round(&deltas, seeds)?;
        }
    }

    fn run_round(
        &self,
        deltas: &DeltaSets,
        seeds: Vec<(&'e IndexedRule, Option<Arc<[Tuple]>>)>,
    ) -> Result<(), EvalError> {
        let env = self.env;
        let cx = RoundCx {
            db: env.db,
            fns: env.fns,
            config: env.config,
            recursive: self.rules.recursive(),
            deltas,
            tracked: env.tracked,
            echo: env.echo,
            stats: env.stats,
        };
        env.stats.round();
        log::debug!("stratum {}: scheduling {} tasks", self.stratum, seeds.len());
        env.pool.run_to_quiescence(|ws| {
            for (rule, seed) in seeds {
                PrefixTask::new(&cx, rule, seed, 0).spawn(ws);
            }
        })
    }
}
