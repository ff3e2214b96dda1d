//! Generation-bounded batching of newly derived tuples.
//!
//! Every join task reports its derivations through a [`Reporter`]. A tuple
//! that is new to a recursive relation either joins the task's local batch,
//! which is dispatched as prefix tasks one generation deeper, or goes to the
//! round's delta set once the task's generation reached
//! `eager_eval_max_gen`. The bound keeps the depth of the task tree finite
//! however deep the recursion in the rules is.

use super::task::PrefixTask;
use super::RoundCx;
use crate::error::EvalError;
use crate::literal::SimplePredicate;
use crate::pool::WorkScope;
use crate::subst::Substitution;
use crate::term::Tuple;
use std::sync::Arc;

pub(crate) struct Reporter<'c> {
    cx: &'c RoundCx<'c>,
    head: &'c SimplePredicate,
    gen: usize,
    batch_size: usize,
    batch: Vec<Tuple>,
}

impl<'c> Reporter<'c> {
    pub(crate) fn new(cx: &'c RoundCx<'c>, head: &'c SimplePredicate, gen: usize, batch_size: usize) -> Self {
        Self {
            cx,
            head,
            gen,
            batch_size: batch_size.max(1),
            batch: Vec::new(),
        }
    }

    /// Stores the head instantiated under `s`
    pub(crate) fn report<'scope>(&mut self, s: &Substitution, ws: &WorkScope<'_, 'scope>) -> Result<(), EvalError>
    where
        'c: 'scope,
    {
        let cx = self.cx;
        let tuple: Tuple = self
            .head
            .args()
            .iter()
            .map(|arg| arg.normalize(s, cx.fns))
            .collect::<Result<Tuple, _>>()
            .map_err(|e| e.in_literal(self.head))?;
        let rel = self.head.symbol();
        if !cx.db.add(rel, Arc::clone(&tuple)) {
            cx.stats.duplicate();
            return Ok(());
        }
        cx.stats.new_fact();
        cx.echo_if_tracked(rel, &tuple);

        let Some(delta) = cx.deltas.get(rel) else {
            return Ok(());
        };
        if self.gen < cx.config.eager_eval_max_gen {
            self.batch.push(tuple);
            if self.batch.len() >= self.batch_size {
                self.dispatch(ws);
            }
        } else {
            delta.insert(tuple);
        }
        Ok(())
    }

    /// Dispatches whatever is still batched
    pub(crate) fn finish<'scope>(mut self, ws: &WorkScope<'_, 'scope>)
    where
        'c: 'scope,
    {
        self.dispatch(ws);
    }

    fn dispatch<'scope>(&mut self, ws: &WorkScope<'_, 'scope>)
    where
        'c: 'scope,
    {
        if self.batch.is_empty() || ws.has_failed() {
            return;
        }
        let seed: Arc<[Tuple]> = std::mem::take(&mut self.batch).into();
        let cx = self.cx;
        for rule in cx.recursive.get(self.head.symbol()).into_iter().flatten() {
            PrefixTask::new(cx, rule, Some(Arc::clone(&seed)), self.gen + 1).spawn(ws);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvalConfig, UnificationMode};
    use crate::db::{FactStore, IndexId, IndexedFactDb};
    use crate::eval::{DeltaSets, EvalStats};
    use crate::functions::Functions;
    use crate::literal::BindingType;
    use crate::normalize::{Atom, Rule};
    use crate::pool::TaskPool;
    use crate::rule::StratumRules;
    use crate::symbol::RelationSymbol;
    use crate::term::{Term, Var};
    use dashmap::DashSet;
    use indexmap::IndexSet;

    struct Fixture {
        db: IndexedFactDb,
        fns: Functions,
        rules: StratumRules,
        deltas: DeltaSets,
        tracked: IndexSet<RelationSymbol>,
        stats: EvalStats,
        head: SimplePredicate,
    }

    fn fixture() -> Fixture {
        let edge = RelationSymbol::extensional("edge", 2);
        let path = RelationSymbol::intensional("path", 2);
        let atom = |s: &RelationSymbol, a: &str, b: &str| Atom::new(s.clone(), vec![Term::var(a), Term::var(b)]);
        let rules = vec![
            Rule::new(atom(&path, "x", "y"), vec![atom(&edge, "x", "y").into()]),
            Rule::new(
                atom(&path, "x", "z"),
                vec![atom(&path, "x", "y").into(), atom(&edge, "y", "z").into()],
            ),
        ];
        let db = IndexedFactDb::new();
        let fns = Functions::with_builtins();
        let rules = StratumRules::plan(&rules, UnificationMode::Assign, &db, &fns).unwrap();
        let deltas = [(path.clone(), DashSet::new())].into_iter().collect();
        let head = SimplePredicate::new(
            path,
            vec![Term::var("a"), Term::var("b")],
            vec![BindingType::Bound, BindingType::Bound],
            false,
            false,
        );
        Fixture {
            db,
            fns,
            rules,
            deltas,
            tracked: IndexSet::new(),
            stats: EvalStats::new(true),
            head,
        }
    }

    fn report_all(f: &Fixture, config: &EvalConfig, gen: usize, facts: &[(i64, i64)]) {
        let pool = TaskPool::new(2).unwrap();
        let cx = RoundCx {
            db: &f.db,
            fns: &f.fns,
            config,
            recursive: f.rules.recursive(),
            deltas: &f.deltas,
            tracked: &f.tracked,
            echo: None,
            stats: &f.stats,
        };
        pool.run_to_quiescence(|ws| {
            let mut reporter = Reporter::new(&cx, &f.head, gen, config.eager_eval_batch_size);
            for &(a, b) in facts {
                let mut s = Substitution::new();
                s.put(Var::new("a"), Term::int(a));
                s.put(Var::new("b"), Term::int(b));
                reporter.report(&s, ws).unwrap();
            }
            reporter.finish(ws);
        })
        .unwrap();
    }

    #[test]
    fn test_at_max_gen_new_tuples_go_to_delta() {
        let f = fixture();
        let config = EvalConfig {
            eager_eval_max_gen: 2,
            ..EvalConfig::default()
        };
        let path = f.head.symbol().clone();
        report_all(&f, &config, 2, &[(1, 2), (2, 3), (1, 2)]);
        assert_eq!(f.deltas[&path].len(), 2, "both distinct tuples wait for the next round");
        assert_eq!(f.db.len(&path), 2);
        let summary = f.stats.summary();
        assert_eq!(summary.new_facts, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.tasks, 0, "nothing dispatched eagerly");
    }

    #[test]
    fn test_below_max_gen_tuples_are_dispatched() {
        let f = fixture();
        let config = EvalConfig {
            eager_eval_max_gen: 4,
            eager_eval_batch_size: 2,
            ..EvalConfig::default()
        };
        let path = f.head.symbol().clone();
        report_all(&f, &config, 0, &[(1, 2), (2, 3), (3, 4)]);
        assert!(f.deltas[&path].is_empty());
        // One full batch of two, then the remainder at finish; one recursive rule each.
        assert_eq!(f.stats.summary().tasks, 2);
        assert!(f.db.contains(&path, &[Term::int(1), Term::int(2)]));
    }

    #[test]
    fn test_non_recursive_relation_is_only_stored() {
        let mut f = fixture();
        f.deltas = DeltaSets::new();
        let config = EvalConfig::default();
        report_all(&f, &config, 0, &[(7, 8)]);
        assert_eq!(f.stats.summary().tasks, 0);
        assert!(f
            .db
            .contains_match(f.head.symbol(), &[Some(Term::int(7)), None], IndexId::SCAN));
    }
}
