//! Triple and quad tables: a node table bound to a tuple table
//!
//! Terms are interned on add and only looked up on find and delete, so reads
//! never grow the dictionary. Observers passed at construction see every
//! tuple that actually changed the table.

use std::fmt;
use std::sync::Arc;

use oxigraph::model::Term;

use crate::core::{NodeId, Tuple, TuplePattern};
use crate::error::{Result, StoreError};
use crate::storage::node_table::NodeTable;
use crate::storage::tuple_table::{TupleScan, TupleTable};

/// Notified synchronously after a successful add or delete.
pub trait TableObserver: Send + Sync {
    fn tuple_added(&self, tuple: &[NodeId]);

    fn tuple_deleted(&self, _tuple: &[NodeId]) {}
}

pub struct NodeTupleTable {
    nodes: Arc<NodeTable>,
    tuples: TupleTable,
    observers: Vec<Arc<dyn TableObserver>>,
}

impl fmt::Debug for NodeTupleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTupleTable")
            .field("arity", &self.tuples.arity())
            .field("indexes", &self.tuples.index_names())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl NodeTupleTable {
    pub fn new(
        nodes: Arc<NodeTable>,
        tuples: TupleTable,
        observers: Vec<Arc<dyn TableObserver>>,
    ) -> Self {
        Self {
            nodes,
            tuples,
            observers,
        }
    }

    pub fn nodes(&self) -> &Arc<NodeTable> {
        &self.nodes
    }

    pub fn tuples(&self) -> &TupleTable {
        &self.tuples
    }

    pub fn arity(&self) -> usize {
        self.tuples.arity()
    }

    fn check_arity(&self, width: usize) -> Result<()> {
        if width != self.arity() {
            return Err(StoreError::Inconsistent(format!(
                "{width} terms given to a table of arity {}",
                self.arity()
            )));
        }
        Ok(())
    }

    pub fn add(&self, terms: &[Term]) -> Result<bool> {
        self.add_observed(terms, None)
    }

    /// Add, also notifying `extra` when the tuple is new.
    pub fn add_observed(&self, terms: &[Term], extra: Option<&dyn TableObserver>) -> Result<bool> {
        self.check_arity(terms.len())?;
        let ids = terms
            .iter()
            .map(|term| self.nodes.intern(term))
            .collect::<Result<Vec<_>>>()?;
        if !self.tuples.add(&ids)? {
            return Ok(false);
        }
        for observer in &self.observers {
            observer.tuple_added(&ids);
        }
        if let Some(observer) = extra {
            observer.tuple_added(&ids);
        }
        Ok(true)
    }

    /// Delete; a tuple mentioning a term never interned cannot be stored, so that is a no-op.
    pub fn delete(&self, terms: &[Term]) -> Result<bool> {
        self.check_arity(terms.len())?;
        let Some(ids) = self.lookup_all(terms)? else {
            return Ok(false);
        };
        self.delete_ids(&ids)
    }

    fn delete_ids(&self, ids: &[NodeId]) -> Result<bool> {
        if !self.tuples.delete(ids)? {
            return Ok(false);
        }
        for observer in &self.observers {
            observer.tuple_deleted(ids);
        }
        Ok(true)
    }

    pub fn contains(&self, terms: &[Term]) -> Result<bool> {
        self.check_arity(terms.len())?;
        match self.lookup_all(terms)? {
            Some(ids) => self.tuples.contains(&ids),
            None => Ok(false),
        }
    }

    fn lookup_all(&self, terms: &[Term]) -> Result<Option<Vec<NodeId>>> {
        let mut ids = Vec::with_capacity(terms.len());
        for term in terms {
            match self.nodes.lookup(term)? {
                Some(id) => ids.push(id),
                None => return Ok(None),
            }
        }
        Ok(Some(ids))
    }

    /// Id pattern for a term pattern; `None` when a bound term is unknown.
    pub fn to_id_pattern(&self, pattern: &[Option<&Term>]) -> Result<Option<TuplePattern>> {
        self.check_arity(pattern.len())?;
        let mut columns = Vec::with_capacity(pattern.len());
        for slot in pattern {
            match slot {
                Some(term) => match self.nodes.lookup(term)? {
                    Some(id) => columns.push(Some(id)),
                    None => return Ok(None),
                },
                None => columns.push(None),
            }
        }
        Ok(Some(TuplePattern::new(columns)))
    }

    /// Terms of every stored tuple matching `pattern`, resolved lazily.
    pub fn find(&self, pattern: &[Option<&Term>]) -> Result<TermTupleIter> {
        match self.to_id_pattern(pattern)? {
            Some(ids) => Ok(TermTupleIter::new(
                Arc::clone(&self.nodes),
                self.tuples.find(&ids)?,
            )),
            None => Ok(TermTupleIter::empty(Arc::clone(&self.nodes))),
        }
    }

    pub fn find_ids(&self, pattern: &TuplePattern) -> Result<TupleScan> {
        self.tuples.find(pattern)
    }

    pub fn resolve_tuple(&self, tuple: &[NodeId]) -> Result<Vec<Term>> {
        tuple.iter().map(|&id| self.nodes.resolve(id)).collect()
    }

    /// Delete every tuple matching `pattern`; returns how many went.
    pub fn delete_matching(&self, pattern: &[Option<&Term>]) -> Result<usize> {
        let Some(ids) = self.to_id_pattern(pattern)? else {
            return Ok(0);
        };
        let matches = self.tuples.find(&ids)?.collect::<Result<Vec<Tuple>>>()?;
        let mut deleted = 0;
        for tuple in &matches {
            if self.delete_ids(tuple)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn clear(&self) {
        self.tuples.clear();
    }
}

/// Resolves id tuples from an inner scan into terms as it is consumed.
#[derive(Debug)]
pub struct TermTupleIter<I = TupleScan> {
    nodes: Arc<NodeTable>,
    inner: Option<I>,
}

impl<I> TermTupleIter<I> {
    pub fn new(nodes: Arc<NodeTable>, inner: I) -> Self {
        Self {
            nodes,
            inner: Some(inner),
        }
    }

    pub fn empty(nodes: Arc<NodeTable>) -> Self {
        Self { nodes, inner: None }
    }
}

impl<I: Iterator<Item = Result<Tuple>>> Iterator for TermTupleIter<I> {
    type Item = Result<Vec<Term>>;

    fn next(&mut self) -> Option<Self::Item> {
        let tuple = match self.inner.as_mut()?.next()? {
            Ok(tuple) => tuple,
            Err(err) => return Some(Err(err)),
        };
        Some(tuple.iter().map(|&id| self.nodes.resolve(id)).collect())
    }
}
