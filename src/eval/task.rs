//! Join tasks.
//!
//! A [`PrefixTask`] starts a rule body at position 0. It evaluates the
//! deterministic literals up to the first positive lookup, then hands the
//! lookup's tuples to a [`SuffixTask`]. A suffix task walks the rest of the
//! body with an explicit backtracking loop, keeping one cursor per lookup
//! position. Each lookup result larger than one batch is split: the current
//! task keeps the first batch and every further batch becomes a sibling task
//! with its own copy of the substitution.

use super::batching::Reporter;
use super::{Phase, RoundCx};
use crate::error::EvalError;
use crate::literal::{SimpleLiteral, SimplePredicate};
use crate::pool::WorkScope;
use crate::rule::IndexedRule;
use crate::subst::Substitution;
use crate::term::Tuple;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Advancing,
    Backtracking,
}

/// One batch of lookup results
#[derive(Debug)]
pub(crate) struct Cursor {
    tuples: Arc<[Tuple]>,
    next: usize,
    end: usize,
}

impl Cursor {
    fn chunks(tuples: Arc<[Tuple]>, size: usize) -> impl Iterator<Item = Cursor> {
        let len = tuples.len();
        let size = size.max(1);
        (0..len).step_by(size).map(move |start| Cursor {
            tuples: Arc::clone(&tuples),
            next: start,
            end: (start + size).min(len),
        })
    }
}

impl Iterator for Cursor {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        if self.next == self.end {
            return None;
        }
        self.next += 1;
        Some(Arc::clone(&self.tuples[self.next - 1]))
    }
}

/// Tuples matching the lookup at `pos` under `s`. A delta occurrence reads
/// `seed` when one is given.
fn candidates(
    cx: &RoundCx<'_>,
    rule: &IndexedRule,
    pos: usize,
    p: &SimplePredicate,
    s: &Substitution,
    seed: Option<&Arc<[Tuple]>>,
) -> Result<Arc<[Tuple]>, EvalError> {
    let key = p.key(s, cx.fns)?;
    match seed {
        Some(seed) if p.is_delta() => {
            if key.iter().all(Option::is_none) {
                return Ok(Arc::clone(seed));
            }
            Ok(seed
                .iter()
                .filter(|t| {
                    key.iter()
                        .zip(t.iter())
                        .all(|(k, v)| k.as_ref().map_or(true, |k| k == v))
                })
                .cloned()
                .collect())
        }
        _ => Ok(cx.db.lookup(p.symbol(), &key, rule.index(pos)).into()),
    }
}

/// Evaluates a literal that is not a positive lookup. Returns whether the
/// search moves forward.
fn step(cx: &RoundCx<'_>, rule: &IndexedRule, pos: usize, s: &mut Substitution) -> Result<bool, EvalError> {
    match &rule.body()[pos] {
        SimpleLiteral::Assignment { var, value } => {
            SimpleLiteral::assign(var, value, s, cx.fns)?;
            Ok(true)
        }
        SimpleLiteral::Check { lhs, rhs, negated } => SimpleLiteral::check(lhs, rhs, *negated, s, cx.fns),
        SimpleLiteral::Destructor {
            scrutinee,
            symbol,
            bindings,
        } => SimpleLiteral::destruct(scrutinee, symbol, bindings, s, cx.fns),
        SimpleLiteral::Predicate(p) => {
            let key = p.key(s, cx.fns)?;
            Ok(!cx.db.contains_match(p.symbol(), &key, rule.index(pos)))
        }
    }
}

/// Binds the next tuple of `cursor`; clears the cursor once it runs dry
fn pull(cx: &RoundCx<'_>, cursor: &mut Option<Cursor>, p: &SimplePredicate, s: &mut Substitution) -> bool {
    match cursor.as_mut().and_then(Iterator::next) {
        Some(tuple) => {
            cx.stats.bound_tuple();
            p.bind(s, &tuple);
            true
        }
        None => {
            *cursor = None;
            false
        }
    }
}

fn positive(lit: &SimpleLiteral) -> Option<&SimplePredicate> {
    lit.as_predicate().filter(|p| !p.is_negated())
}

/// Splits `tuples` at the batch size for `pos`. Every batch but the first is
/// handed to a new sibling task; the first is returned.
#[allow(clippy::too_many_arguments)]
fn fork<'c, 'scope>(
    cx: &'c RoundCx<'c>,
    rule: &'c IndexedRule,
    pos: usize,
    s: &Substitution,
    tuples: Arc<[Tuple]>,
    seed: Option<&Arc<[Tuple]>>,
    gen: usize,
    ws: &WorkScope<'_, 'scope>,
) -> Option<Cursor>
where
    'c: 'scope,
{
    let mut chunks = Cursor::chunks(tuples, cx.batch_size(rule, pos));
    let first = chunks.next()?;
    for chunk in chunks {
        SuffixTask {
            cx,
            rule,
            start: pos,
            s: s.clone(),
            cursor: chunk,
            seed: seed.cloned(),
            gen,
        }
        .spawn(ws);
    }
    Some(first)
}

/// Evaluates a rule body from the start
pub(crate) struct PrefixTask<'c> {
    cx: &'c RoundCx<'c>,
    rule: &'c IndexedRule,
    seed: Option<Arc<[Tuple]>>,
    gen: usize,
}

impl<'c> PrefixTask<'c> {
    pub(crate) fn new(
        cx: &'c RoundCx<'c>,
        rule: &'c IndexedRule,
        seed: Option<Arc<[Tuple]>>,
        gen: usize,
    ) -> Self {
        Self { cx, rule, seed, gen }
    }

    pub(crate) fn spawn<'scope>(self, ws: &WorkScope<'_, 'scope>)
    where
        'c: 'scope,
    {
        self.cx.stats.task();
        log::trace!("prefix task (gen {}) for {}", self.gen, self.rule.head());
        let rule = self.rule;
        ws.spawn(move |ws| self.run(ws).map_err(|e| e.in_rule(rule)));
    }

    fn run<'scope>(self, ws: &WorkScope<'_, 'scope>) -> Result<(), EvalError>
    where
        'c: 'scope,
    {
        let Self { cx, rule, seed, gen } = self;
        let started = cx.stats.start();
        let mut s = Substitution::new();
        for (pos, lit) in rule.body().iter().enumerate() {
            if let Some(p) = positive(lit) {
                let tuples =
                    candidates(cx, rule, pos, p, &s, seed.as_ref()).map_err(|e| e.in_literal(lit))?;
                cx.stats.record(rule, Phase::Prefix, started);
                let Some(cursor) = fork(cx, rule, pos, &s, tuples, seed.as_ref(), gen, ws) else {
                    return Ok(());
                };
                return SuffixTask {
                    cx,
                    rule,
                    start: pos,
                    s,
                    cursor,
                    seed,
                    gen,
                }
                .run(ws);
            }
            if !step(cx, rule, pos, &mut s).map_err(|e| e.in_literal(lit))? {
                cx.stats.record(rule, Phase::Prefix, started);
                return Ok(());
            }
        }
        // No lookups at all: the body held for exactly one substitution.
        let mut reporter = Reporter::new(cx, rule.head(), gen, 1);
        let result = reporter.report(&s, ws);
        reporter.finish(ws);
        cx.stats.record(rule, Phase::Prefix, started);
        result
    }
}

/// Continues a rule body from the lookup at `start`, over one batch of that
/// lookup's tuples. The seed follows the task so a delta occurrence later in
/// the body still reads it.
pub(crate) struct SuffixTask<'c> {
    cx: &'c RoundCx<'c>,
    rule: &'c IndexedRule,
    start: usize,
    s: Substitution,
    cursor: Cursor,
    seed: Option<Arc<[Tuple]>>,
    gen: usize,
}

impl<'c> SuffixTask<'c> {
    fn spawn<'scope>(self, ws: &WorkScope<'_, 'scope>)
    where
        'c: 'scope,
    {
        self.cx.stats.task();
        log::trace!(
            "suffix task (gen {}) at position {} of {}",
            self.gen,
            self.start,
            self.rule.head()
        );
        let rule = self.rule;
        ws.spawn(move |ws| self.run(ws).map_err(|e| e.in_rule(rule)));
    }

    fn run<'scope>(self, ws: &WorkScope<'_, 'scope>) -> Result<(), EvalError>
    where
        'c: 'scope,
    {
        let started = self.cx.stats.start();
        let mut reporter = Reporter::new(
            self.cx,
            self.rule.head(),
            self.gen,
            self.cx.config.eager_eval_batch_size,
        );
        let (cx, rule) = (self.cx, self.rule);
        let result = self.join(&mut reporter, ws);
        reporter.finish(ws);
        cx.stats.record(rule, Phase::Suffix, started);
        result
    }

    fn join<'scope>(self, reporter: &mut Reporter<'c>, ws: &WorkScope<'_, 'scope>) -> Result<(), EvalError>
    where
        'c: 'scope,
    {
        let Self {
            cx,
            rule,
            start,
            mut s,
            cursor,
            seed,
            gen,
        } = self;
        let body = rule.body();
        let mut cursors: Vec<Option<Cursor>> = (0..body.len()).map(|_| None).collect();
        cursors[start] = Some(cursor);

        // Backtracking from just past `start` pulls the first tuple.
        let mut pos = start + 1;
        let mut dir = Direction::Backtracking;
        loop {
            match dir {
                Direction::Advancing if pos == body.len() => {
                    reporter.report(&s, ws)?;
                    dir = Direction::Backtracking;
                }
                Direction::Advancing => {
                    let lit = &body[pos];
                    let moved = if let Some(p) = positive(lit) {
                        let tuples =
                            candidates(cx, rule, pos, p, &s, seed.as_ref()).map_err(|e| e.in_literal(lit))?;
                        cursors[pos] = fork(cx, rule, pos, &s, tuples, seed.as_ref(), gen, ws);
                        pull(cx, &mut cursors[pos], p, &mut s)
                    } else {
                        step(cx, rule, pos, &mut s).map_err(|e| e.in_literal(lit))?
                    };
                    if moved {
                        pos += 1;
                    } else {
                        dir = Direction::Backtracking;
                    }
                }
                Direction::Backtracking => {
                    if pos == start {
                        return Ok(());
                    }
                    pos -= 1;
                    if let Some(p) = positive(&body[pos]) {
                        if pull(cx, &mut cursors[pos], p, &mut s) {
                            pos += 1;
                            dir = Direction::Advancing;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvalConfig, UnificationMode};
    use crate::db::{FactStore, IndexedFactDb};
    use crate::eval::{DeltaSets, EvalStats};
    use crate::functions::Functions;
    use crate::normalize::{Atom, Literal, Rule};
    use crate::pool::TaskPool;
    use crate::rule::StratumRules;
    use crate::symbol::RelationSymbol;
    use crate::term::Term;
    use indexmap::IndexSet;

    fn ints(values: &[i64]) -> Tuple {
        values.iter().map(|&v| Term::int(v)).collect()
    }

    /// Runs the base rules of `rules` once, without any recursion
    fn run_base(db: &IndexedFactDb, rules: &[Rule], config: &EvalConfig) -> EvalStats {
        let fns = Functions::with_builtins();
        let planned = StratumRules::plan(rules, config.unification, db, &fns).unwrap();
        let deltas = DeltaSets::new();
        let tracked = IndexSet::new();
        let stats = EvalStats::new(true);
        let cx = RoundCx {
            db,
            fns: &fns,
            config,
            recursive: planned.recursive(),
            deltas: &deltas,
            tracked: &tracked,
            echo: None,
            stats: &stats,
        };
        let pool = TaskPool::new(3).unwrap();
        pool.run_to_quiescence(|ws| {
            for rule in planned.base() {
                PrefixTask::new(&cx, rule, None, 0).spawn(ws);
            }
        })
        .unwrap();
        stats
    }

    #[test]
    fn test_cursor_chunks_cover_every_tuple_once() {
        let tuples: Arc<[Tuple]> = (0..7).map(|i| ints(&[i])).collect();
        let chunks: Vec<Vec<Tuple>> = Cursor::chunks(tuples, 3).map(|c| c.collect::<Vec<_>>()).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(chunks[2], vec![ints(&[6])]);
    }

    #[test]
    fn test_three_way_join_with_small_batches() {
        let db = IndexedFactDb::new();
        let e = RelationSymbol::extensional("e", 2);
        let tri = RelationSymbol::intensional("tri", 3);
        // Two triangles (1 2 3) and (4 5 6), plus a dangling edge.
        for (a, b) in [(1, 2), (2, 3), (3, 1), (4, 5), (5, 6), (6, 4), (3, 7)] {
            db.add(&e, ints(&[a, b]));
        }
        let var = |n: &str| Term::var(n);
        let rule = Rule::new(
            Atom::new(tri.clone(), vec![var("x"), var("y"), var("z")]),
            vec![
                Atom::new(e.clone(), vec![var("x"), var("y")]).into(),
                Atom::new(e.clone(), vec![var("y"), var("z")]).into(),
                Atom::new(e, vec![var("z"), var("x")]).into(),
            ],
        );
        let config = EvalConfig {
            task_size: 1,
            ..EvalConfig::default()
        };
        let stats = run_base(&db, &[rule], &config);

        // Each triangle is found once per rotation.
        assert_eq!(db.len(&tri), 6);
        assert!(db.contains(&tri, &ints(&[2, 3, 1])));
        assert!(!db.contains(&tri, &ints(&[3, 7, 1])));
        assert!(stats.summary().tasks > 7, "Every first-level tuple gets its own task");
    }

    #[test]
    fn test_rule_without_lookups_fires_once() {
        let db = IndexedFactDb::new();
        let answer = RelationSymbol::intensional("answer", 1);
        let rule = Rule::new(
            Atom::new(answer.clone(), vec![Term::var("x")]),
            vec![Literal::eq(
                Term::var("x"),
                Term::call("mul", vec![Term::int(6), Term::int(7)]),
            )],
        );
        run_base(&db, &[rule], &EvalConfig::default());
        assert_eq!(db.facts(&answer), vec![ints(&[42])]);
    }

    #[test]
    fn test_failed_check_backtracks_to_previous_lookup() {
        let db = IndexedFactDb::new();
        let n = RelationSymbol::extensional("n", 1);
        let big = RelationSymbol::intensional("big", 1);
        for i in 0..10 {
            db.add(&n, ints(&[i]));
        }
        let rule = Rule::new(
            Atom::new(big.clone(), vec![Term::var("x")]),
            vec![
                Atom::new(n, vec![Term::var("x")]).into(),
                Literal::eq(
                    Term::call("ge", vec![Term::var("x"), Term::int(7)]),
                    Term::bool(true),
                ),
            ],
        );
        let config = EvalConfig {
            task_size: 4,
            unification: UnificationMode::Inline,
            ..EvalConfig::default()
        };
        run_base(&db, &[rule], &config);
        assert_eq!(db.facts(&big), vec![ints(&[7]), ints(&[8]), ints(&[9])]);
    }
}
