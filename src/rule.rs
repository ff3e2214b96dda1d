use crate::config::UnificationMode;
use crate::db::{IndexCatalog, IndexId};
use crate::error::ProgramError;
use crate::functions::Functions;
use crate::literal::{SimpleLiteral, SimplePredicate};
use crate::normalize::{simplify, Atom, Literal, Rule};
use crate::symbol::{RelationSymbol, Symbol};
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// A rule in canonical form: one head predicate and a fixed, ordered body.
/// Every head variable is bound by the body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimpleRule {
    head: SimplePredicate,
    body: Vec<SimpleLiteral>,
}

impl SimpleRule {
    pub(crate) fn new(head: SimplePredicate, body: Vec<SimpleLiteral>) -> Self {
        Self { head, body }
    }

    /// Normalizes `rule`; see [`crate::normalize`].
    ///
    /// # Errors
    ///
    /// Returns the [`ProgramError`] describing why the rule is invalid.
    pub fn make(rule: &Rule, mode: UnificationMode) -> Result<Self, ProgramError> {
        simplify(rule, mode)
    }

    /// The head predicate
    #[must_use]
    pub fn head(&self) -> &SimplePredicate {
        &self.head
    }

    /// The body literals, in evaluation order
    #[must_use]
    pub fn body(&self) -> &[SimpleLiteral] {
        &self.body
    }
}

impl fmt::Display for SimpleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for (i, lit) in self.body.iter().enumerate() {
            f.write_str(if i == 0 { " :-\n\t" } else { ",\n\t" })?;
            write!(f, "{lit}")?;
        }
        f.write_str(".")
    }
}

/// A [`SimpleRule`] plus, per body position, the store index used for its
/// lookup and whether the position's results should be split into smaller
/// batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRule {
    rule: SimpleRule,
    indices: Vec<IndexId>,
    split: Vec<bool>,
}

impl IndexedRule {
    /// Attaches externally chosen indices and split hints. Positions that are
    /// not store lookups should carry [`IndexId::SCAN`] and `false`.
    ///
    /// # Errors
    ///
    /// Fails if either vector's length differs from the body length.
    pub fn new(rule: SimpleRule, indices: Vec<IndexId>, split: Vec<bool>) -> Result<Self, ProgramError> {
        for found in [indices.len(), split.len()] {
            if found != rule.body.len() {
                return Err(ProgramError::IndexShape {
                    rule: rule.to_string(),
                    expected: rule.body.len(),
                    found,
                });
            }
        }
        Ok(Self {
            rule,
            indices,
            split,
        })
    }

    /// Registers one index per lookup position, keyed on that position's
    /// bound arguments, and hints splitting at positions followed by a call
    /// to an expensive function.
    pub fn plan(rule: SimpleRule, catalog: &impl IndexCatalog, fns: &Functions) -> Self {
        let expensive = |sym: &Symbol| fns.is_expensive(sym);
        let body = rule.body();
        let indices = body
            .iter()
            .map(|lit| match lit {
                SimpleLiteral::Predicate(p) if !p.is_delta() => {
                    catalog.register_index(p.symbol(), &p.bound_positions())
                }
                _ => IndexId::SCAN,
            })
            .collect();
        let split = (0..body.len())
            .map(|pos| {
                body[pos].as_predicate().is_some_and(|p| !p.is_negated())
                    && (body[pos + 1..]
                        .iter()
                        .any(|l| l.mentions_function(&expensive))
                        || rule
                            .head()
                            .args()
                            .iter()
                            .any(|a| a.mentions_function(&expensive)))
            })
            .collect();
        Self {
            rule,
            indices,
            split,
        }
    }

    /// The underlying rule
    #[must_use]
    pub fn rule(&self) -> &SimpleRule {
        &self.rule
    }

    /// The head predicate
    #[must_use]
    pub fn head(&self) -> &SimplePredicate {
        self.rule.head()
    }

    /// The body literals
    #[must_use]
    pub fn body(&self) -> &[SimpleLiteral] {
        self.rule.body()
    }

    /// Index used by the lookup at `pos`
    #[must_use]
    pub fn index(&self, pos: usize) -> IndexId {
        self.indices[pos]
    }

    /// Whether the lookup at `pos` is split into small batches
    #[must_use]
    pub fn should_split(&self, pos: usize) -> bool {
        self.split[pos]
    }
}

impl fmt::Display for IndexedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rule)
    }
}

/// The rules of one stratum, partitioned for semi-naive evaluation.
///
/// Base rules run once against the full relations. Recursive rules are
/// keyed by the relation whose newly derived tuples they consume; each holds
/// one delta occurrence of that relation, usually as its first predicate.
#[derive(Debug, Clone, Default)]
pub struct StratumRules {
    base: Vec<IndexedRule>,
    recursive: IndexMap<RelationSymbol, Vec<IndexedRule>>,
}

impl StratumRules {
    /// Uses a partition computed elsewhere
    #[must_use]
    pub fn new(base: Vec<IndexedRule>, recursive: IndexMap<RelationSymbol, Vec<IndexedRule>>) -> Self {
        Self { base, recursive }
    }

    /// Compiles the rules of a stratum whose relations are the heads of
    /// `rules`. Every rule becomes a base rule; each positive body atom over
    /// a relation of the stratum also yields a delta variant keyed on that
    /// relation, with the delta atom moved to the front of the body where
    /// the rule allows it.
    ///
    /// # Errors
    ///
    /// Fails on the first rule that does not normalize.
    pub fn plan(
        rules: &[Rule],
        mode: UnificationMode,
        catalog: &impl IndexCatalog,
        fns: &Functions,
    ) -> Result<Self, ProgramError> {
        let heads: IndexSet<&RelationSymbol> = rules.iter().map(|r| &r.head.symbol).collect();
        let mut planned = Self::default();
        for rule in rules {
            let simple = SimpleRule::make(rule, mode)?;
            planned.base.push(IndexedRule::plan(simple, catalog, fns));
            for (i, lit) in rule.body.iter().enumerate() {
                let Literal::Atom(atom) = lit else { continue };
                if atom.negated || !heads.contains(&atom.symbol) {
                    continue;
                }
                let mut delta = atom.clone();
                delta.delta = true;
                let variant = Self::delta_variant(rule, i, &delta, mode)?;
                planned
                    .recursive
                    .entry(atom.symbol.clone())
                    .or_default()
                    .push(IndexedRule::plan(variant, catalog, fns));
            }
        }
        Ok(planned)
    }

    /// Builds the variant of `rule` whose atom at `i` reads the delta. The
    /// delta atom goes first when the rest of the body still normalizes
    /// that way, e.g. when its call arguments need no variable bound later
    /// in the body; otherwise it stays where it was written.
    fn delta_variant(
        rule: &Rule,
        i: usize,
        delta: &Atom,
        mode: UnificationMode,
    ) -> Result<SimpleRule, ProgramError> {
        let mut front = Vec::with_capacity(rule.body.len());
        front.push(Literal::Atom(delta.clone()));
        front.extend(
            rule.body
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, l)| l.clone()),
        );
        if let Ok(variant) = SimpleRule::make(&Rule::new(rule.head.clone(), front), mode) {
            return Ok(variant);
        }
        let mut written = rule.body.clone();
        written[i] = Literal::Atom(delta.clone());
        SimpleRule::make(&Rule::new(rule.head.clone(), written), mode)
    }

    /// Rules run once at the start of the stratum
    #[must_use]
    pub fn base(&self) -> &[IndexedRule] {
        &self.base
    }

    /// Rules re-fired by new tuples of each key relation
    #[must_use]
    pub fn recursive(&self) -> &IndexMap<RelationSymbol, Vec<IndexedRule>> {
        &self.recursive
    }

    /// Relations whose new tuples re-fire rules
    pub fn recursive_relations(&self) -> impl Iterator<Item = &RelationSymbol> {
        self.recursive.keys()
    }
}
