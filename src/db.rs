//! Fact storage.
//!
//! [`FactStore`] is what join tasks need from a store: lookups by partial key
//! and idempotent insertion, both safe while other threads insert.
//! [`IndexedFactDb`] is the in-memory implementation: one concurrent set of
//! tuples per relation plus hash indices over chosen argument positions.

use crate::symbol::RelationSymbol;
use crate::term::{Term, Tuple};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// Handle of an index registered for one relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexId(pub usize);

impl IndexId {
    /// No index: lookups scan the relation and filter
    pub const SCAN: IndexId = IndexId(usize::MAX);
}

/// Concurrent relation storage used by the evaluator
pub trait FactStore: Send + Sync {
    /// Tuples of `rel` agreeing with every `Some` position of `key`. Reflects
    /// every insertion that completed before the call.
    fn lookup(&self, rel: &RelationSymbol, key: &[Option<Term>], index: IndexId) -> Vec<Tuple>;

    /// Whether any tuple of `rel` matches `key`
    fn contains_match(&self, rel: &RelationSymbol, key: &[Option<Term>], index: IndexId) -> bool {
        !self.lookup(rel, key, index).is_empty()
    }

    /// Inserts `tuple` unless present; returns true iff it was new
    fn add(&self, rel: &RelationSymbol, tuple: Tuple) -> bool;
}

/// Something that can build lookup indices ahead of evaluation
pub trait IndexCatalog {
    /// Returns an index of `rel` keyed on `positions`, creating it if needed
    fn register_index(&self, rel: &RelationSymbol, positions: &[usize]) -> IndexId;
}

type Key = SmallVec<[Term; 4]>;

#[derive(Debug)]
struct Index {
    positions: Vec<usize>,
    buckets: DashMap<Key, Vec<Tuple>>,
}

impl Index {
    fn project(&self, tuple: &[Term]) -> Key {
        self.positions.iter().map(|&i| tuple[i].clone()).collect()
    }

    fn key_of(&self, key: &[Option<Term>]) -> Option<Key> {
        self.positions
            .iter()
            .map(|&i| key.get(i).and_then(Clone::clone))
            .collect()
    }

    fn insert(&self, tuple: &Tuple) {
        self.buckets
            .entry(self.project(tuple))
            .or_default()
            .push(Arc::clone(tuple));
    }
}

#[derive(Debug, Default)]
struct Relation {
    facts: DashSet<Tuple>,
    indices: RwLock<Vec<Index>>,
}

fn matches(key: &[Option<Term>], tuple: &[Term]) -> bool {
    key.iter()
        .zip(tuple)
        .all(|(k, v)| k.as_ref().map_or(true, |k| k == v))
}

/// In-memory indexed fact database
#[derive(Debug, Default)]
pub struct IndexedFactDb {
    relations: DashMap<RelationSymbol, Arc<Relation>>,
}

impl IndexedFactDb {
    /// Create an empty database
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn relation(&self, rel: &RelationSymbol) -> Arc<Relation> {
        if let Some(r) = self.relations.get(rel) {
            return Arc::clone(&r);
        }
        Arc::clone(&self.relations.entry(rel.clone()).or_default())
    }

    fn existing(&self, rel: &RelationSymbol) -> Option<Arc<Relation>> {
        self.relations.get(rel).map(|r| Arc::clone(&r))
    }

    /// All tuples of `rel`, sorted
    #[must_use]
    pub fn facts(&self, rel: &RelationSymbol) -> Vec<Tuple> {
        let mut out: Vec<Tuple> = self
            .existing(rel)
            .map(|r| r.facts.iter().map(|t| Arc::clone(t.key())).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Whether `tuple` is a fact of `rel`
    #[must_use]
    pub fn contains(&self, rel: &RelationSymbol, tuple: &[Term]) -> bool {
        self.existing(rel).is_some_and(|r| r.facts.contains(tuple))
    }

    /// Number of facts of `rel`
    #[must_use]
    pub fn len(&self, rel: &RelationSymbol) -> usize {
        self.existing(rel).map_or(0, |r| r.facts.len())
    }

    /// Total number of facts
    #[must_use]
    pub fn total_facts(&self) -> usize {
        self.relations.iter().map(|r| r.facts.len()).sum()
    }

    /// Relations known to the database, sorted by name
    #[must_use]
    pub fn relations(&self) -> Vec<RelationSymbol> {
        let mut out: Vec<RelationSymbol> = self.relations.iter().map(|r| r.key().clone()).collect();
        out.sort_by(|a, b| a.name().cmp(b.name()).then(a.arity().cmp(&b.arity())));
        out
    }

    /// Number of indices registered on `rel`
    #[must_use]
    pub fn index_count(&self, rel: &RelationSymbol) -> usize {
        self.existing(rel).map_or(0, |r| r.indices.read().len())
    }

    /// Every relation as `{"name": [[arg, ...], ...]}`
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for rel in self.relations() {
            let facts = self.facts(&rel);
            out.insert(
                rel.name().to_string(),
                serde_json::to_value(&facts).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(out)
    }
}

impl IndexCatalog for IndexedFactDb {
    fn register_index(&self, rel: &RelationSymbol, positions: &[usize]) -> IndexId {
        if positions.is_empty() {
            return IndexId::SCAN;
        }
        let relation = self.relation(rel);
        let mut indices = relation.indices.write();
        if let Some(i) = indices.iter().position(|ix| ix.positions == positions) {
            return IndexId(i);
        }
        let index = Index {
            positions: positions.to_vec(),
            buckets: DashMap::new(),
        };
        for tuple in relation.facts.iter() {
            index.insert(tuple.key());
        }
        indices.push(index);
        IndexId(indices.len() - 1)
    }
}

impl FactStore for IndexedFactDb {
    fn lookup(&self, rel: &RelationSymbol, key: &[Option<Term>], index: IndexId) -> Vec<Tuple> {
        let Some(relation) = self.existing(rel) else {
            return Vec::new();
        };
        let indices = relation.indices.read();
        if let Some(bucket_key) = indices.get(index.0).and_then(|ix| ix.key_of(key)) {
            return indices[index.0]
                .buckets
                .get(&bucket_key)
                .map(|bucket| bucket.iter().filter(|t| matches(key, t)).cloned().collect())
                .unwrap_or_default();
        }
        relation
            .facts
            .iter()
            .filter(|t| matches(key, t.key()))
            .map(|t| Arc::clone(t.key()))
            .collect()
    }

    fn contains_match(&self, rel: &RelationSymbol, key: &[Option<Term>], index: IndexId) -> bool {
        if key.iter().all(Option::is_some) {
            let tuple: Vec<Term> = key.iter().flatten().cloned().collect();
            return self.contains(rel, &tuple);
        }
        !self.lookup(rel, key, index).is_empty()
    }

    fn add(&self, rel: &RelationSymbol, tuple: Tuple) -> bool {
        let relation = self.relation(rel);
        // Held across both steps so a concurrent register_index cannot miss the tuple.
        let indices = relation.indices.read();
        if !relation.facts.insert(Arc::clone(&tuple)) {
            return false;
        }
        for index in indices.iter() {
            index.insert(&tuple);
        }
        true
    }
}
