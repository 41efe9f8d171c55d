//! Dataset: the default graph and every named graph of one store
//!
//! The default graph lives in a triple table; named graphs share one quad
//! table whose first column is the graph. [`Graph`] views are cheap handles
//! that fix which table (and which graph column value) they read.

pub mod graph;

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use oxigraph::model::Term;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::core::{
    default_graph_name, is_default_graph, is_union_graph, Quad, Triple, Tuple, TuplePattern,
};
use crate::error::{Result, StoreError};
use crate::reorder::{self, ReorderTransformation};
use crate::stats::Statistics;
use crate::storage::indexing::permutation::Permutation;
use crate::storage::node_table::NodeTable;
use crate::storage::node_tuple_table::{NodeTupleTable, TableObserver, TermTupleIter};
use crate::storage::tuple_table::{TupleScan, TupleTable};
use crate::storage::util::{StoreConfig, QUADS_DIR, STATS_FILE, TRIPLES_DIR};

pub use graph::{Graph, GraphKind};

/// Quad table column holding the graph
const GRAPH_COLUMN: usize = 0;

#[derive(Debug)]
struct DatasetInner {
    config: StoreConfig,
    nodes: Arc<NodeTable>,
    triples: NodeTupleTable,
    quads: NodeTupleTable,
    statistics: RwLock<Option<Arc<Statistics>>>,
    reorder: RwLock<ReorderTransformation>,
    closed: AtomicBool,
}

/// Shared handle to an open store. Clones refer to the same store.
#[derive(Clone, Debug)]
pub struct Dataset {
    inner: Arc<DatasetInner>,
}

impl Dataset {
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_observed(config, Vec::new())
    }

    /// Open with observers notified of every change to either table.
    pub fn open_observed(
        config: StoreConfig,
        observers: Vec<Arc<dyn TableObserver>>,
    ) -> Result<Self> {
        let batch = config.scan_batch_size;
        let (config, nodes, triple_tuples, quad_tuples, statistics) = match config.location.clone()
        {
            None => {
                let triples = TupleTable::in_memory(3, &config.triple_indexes, batch)?;
                let quads = TupleTable::in_memory(4, &config.quad_indexes, batch)?;
                (config, NodeTable::in_memory(), triples, quads, None)
            }
            Some(dir) => {
                std::fs::create_dir_all(dir.join(TRIPLES_DIR))?;
                std::fs::create_dir_all(dir.join(QUADS_DIR))?;
                let stored = StoreConfig::load(&dir)?;
                let fresh = stored.is_none();
                let config = match stored {
                    Some(stored) => config.merge_stored(stored),
                    None => config,
                };

                let triples =
                    TupleTable::open(&dir.join(TRIPLES_DIR), 3, &config.triple_indexes, batch)?;
                let quads = TupleTable::open(&dir.join(QUADS_DIR), 4, &config.quad_indexes, batch)?;
                if fresh {
                    config.save(&dir)?;
                }
                let nodes = NodeTable::open(&dir)?;
                let statistics = read_statistics(&dir);
                (config, nodes, triples, quads, statistics)
            }
        };

        let reorder = reorder::select(config.reorder.as_deref(), statistics.clone())?;
        let nodes = Arc::new(nodes);
        let inner = DatasetInner {
            triples: NodeTupleTable::new(Arc::clone(&nodes), triple_tuples, observers.clone()),
            quads: NodeTupleTable::new(Arc::clone(&nodes), quad_tuples, observers),
            nodes,
            statistics: RwLock::new(statistics),
            reorder: RwLock::new(reorder),
            closed: AtomicBool::new(false),
            config,
        };
        match &inner.config.location {
            Some(dir) => info!(
                "Opened dataset at {} ({} triples, {} quads, {} reorder)",
                dir.display(),
                inner.triples.len(),
                inner.quads.len(),
                inner.reorder.read().name()
            ),
            None => debug!("Opened in-memory dataset"),
        }
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn location(&self) -> Option<&Path> {
        self.inner.config.location.as_deref()
    }

    pub(crate) fn nodes(&self) -> &Arc<NodeTable> {
        &self.inner.nodes
    }

    pub(crate) fn triple_table(&self) -> &NodeTupleTable {
        &self.inner.triples
    }

    pub(crate) fn quad_table(&self) -> &NodeTupleTable {
        &self.inner.quads
    }

    pub fn default_graph(&self) -> Graph {
        Graph::new(self.clone(), GraphKind::Default)
    }

    pub fn union_graph(&self) -> Graph {
        Graph::new(self.clone(), GraphKind::Union)
    }

    /// View of the graph called `name`; the reserved default and union names map to those views.
    pub fn graph(&self, name: &Term) -> Graph {
        let kind = if is_default_graph(name) {
            GraphKind::Default
        } else if is_union_graph(name) {
            GraphKind::Union
        } else {
            GraphKind::Named(name.clone())
        };
        Graph::new(self.clone(), kind)
    }

    pub fn add_quad(&self, quad: &Quad) -> Result<bool> {
        self.graph(&quad.graph).add(&quad.triple())
    }

    pub fn delete_quad(&self, quad: &Quad) -> Result<bool> {
        self.graph(&quad.graph).delete(&quad.triple())
    }

    pub fn contains_quad(&self, quad: &Quad) -> Result<bool> {
        self.graph(&quad.graph).contains(&quad.triple())
    }

    /// Quads matching the pattern; `None` positions are wildcards.
    ///
    /// Without a graph, default-graph triples come first (named with the
    /// default graph name), then every named graph. The union graph name
    /// matches every named graph.
    pub fn find_quads(
        &self,
        graph: Option<&Term>,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<QuadIter> {
        self.check_open()?;
        let in_default = || -> Result<QuadIter> {
            let triples = self.inner.triples.find(&[subject, predicate, object])?;
            Ok(QuadIter::new(triples.map(
                |terms: Result<Vec<Term>>| -> Result<Quad> {
                    Ok(to_triple(terms?)?.in_graph(default_graph_name()))
                },
            )))
        };
        let in_named = |graph: Option<&Term>| -> Result<QuadIter> {
            let quads = self
                .inner
                .quads
                .find(&[graph, subject, predicate, object])?;
            Ok(QuadIter::new(quads.map(
                |terms: Result<Vec<Term>>| -> Result<Quad> { to_quad(terms?) },
            )))
        };

        match graph {
            None => Ok(QuadIter::new(in_default()?.chain(in_named(None)?))),
            Some(name) if is_default_graph(name) => in_default(),
            Some(name) if is_union_graph(name) => in_named(None),
            Some(name) => in_named(Some(name)),
        }
    }

    /// True when the named graph holds at least one quad.
    /// The default and union graphs always exist.
    pub fn contains_graph(&self, name: &Term) -> Result<bool> {
        self.check_open()?;
        if is_default_graph(name) || is_union_graph(name) {
            return Ok(true);
        }
        let Some(pattern) = self
            .inner
            .quads
            .to_id_pattern(&[Some(name), None, None, None])?
        else {
            return Ok(false);
        };
        self.inner
            .quads
            .find_ids(&pattern)?
            .next()
            .transpose()
            .map(|first| first.is_some())
    }

    /// Distinct names of the graphs that hold quads, in id order.
    pub fn list_graph_nodes(&self) -> Result<GraphNodeIter> {
        self.check_open()?;
        let tuples = self.inner.quads.tuples();
        let pattern = TuplePattern::any(tuples.arity());
        let graphs = distinct_projection(
            tuples,
            &pattern,
            GRAPH_COLUMN..GRAPH_COLUMN + 1,
            |permutation| permutation.first_column() == GRAPH_COLUMN,
        )?;
        let terms = TermTupleIter::new(Arc::clone(&self.inner.nodes), graphs);
        Ok(GraphNodeIter::new(terms.map(
            |terms: Result<Vec<Term>>| -> Result<Term> {
                terms?
                    .pop()
                    .ok_or_else(|| StoreError::Inconsistent("empty graph projection".to_string()))
            },
        )))
    }

    /// Remove every triple of a graph; returns how many were removed.
    pub fn remove_graph(&self, name: &Term) -> Result<usize> {
        self.graph(name).clear()
    }

    /// Triples in the default graph plus quads in named graphs
    pub fn len(&self) -> Result<usize> {
        self.check_open()?;
        Ok(self.inner.triples.len() + self.inner.quads.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn statistics(&self) -> Option<Arc<Statistics>> {
        self.inner.statistics.read().clone()
    }

    pub fn reorder_transformation(&self) -> ReorderTransformation {
        self.inner.reorder.read().clone()
    }

    /// Replace the statistics snapshot, persist it and reselect the reorder.
    pub(crate) fn install_statistics(&self, statistics: Statistics) -> Result<()> {
        self.check_open()?;
        if let Some(dir) = self.location() {
            statistics.save(&dir.join(STATS_FILE))?;
        }
        let statistics = Arc::new(statistics);
        let reorder = reorder::select(
            self.inner.config.reorder.as_deref(),
            Some(Arc::clone(&statistics)),
        )?;
        *self.inner.statistics.write() = Some(statistics);
        *self.inner.reorder.write() = reorder;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.nodes.is_dirty()
            || self.inner.triples.tuples().is_dirty()
            || self.inner.quads.tuples().is_dirty()
    }

    /// Flush the node table and every index to disk.
    ///
    /// Must not race with writers. A failed sync leaves the store dirty and
    /// usable; the next sync retries.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.check_open()?;
        let Some(dir) = self.location() else {
            return Ok(());
        };
        if !force && !self.is_dirty() {
            return Ok(());
        }
        self.inner.nodes.sync(force)?;
        self.inner.triples.tuples().sync(force)?;
        self.inner.quads.tuples().sync(force)?;
        debug!("Synced dataset at {}", dir.display());
        Ok(())
    }

    /// Sync and release the store; every later call fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.sync(false)?;
        self.inner.closed.store(true, Ordering::Release);
        debug!("Closed dataset");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Check that the secondary indexes of both tables agree with their primaries.
    pub fn verify(&self) -> Result<()> {
        self.check_open()?;
        self.inner.triples.tuples().verify()?;
        self.inner.quads.tuples().verify()
    }
}

fn read_statistics(dir: &Path) -> Option<Arc<Statistics>> {
    let path = dir.join(STATS_FILE);
    if !path.exists() {
        return None;
    }
    match Statistics::load(&path) {
        Ok(statistics) => Some(Arc::new(statistics)),
        Err(err) => {
            warn!("Ignoring statistics file {}: {err}", path.display());
            None
        }
    }
}

pub(crate) fn to_triple(terms: Vec<Term>) -> Result<Triple> {
    Triple::from_terms(terms).ok_or_else(|| {
        StoreError::Inconsistent("triple table returned a tuple of the wrong arity".to_string())
    })
}

pub(crate) fn to_quad(terms: Vec<Term>) -> Result<Quad> {
    Quad::from_terms(terms).ok_or_else(|| {
        StoreError::Inconsistent("quad table returned a tuple of the wrong arity".to_string())
    })
}

/// Distinct projections of `columns` over the tuples matching `pattern`.
///
/// Uses an index `accept`ed by the caller, whose order keeps equal
/// projections adjacent; without one, falls back to any index and a hash set.
pub(crate) fn distinct_projection(
    tuples: &TupleTable,
    pattern: &TuplePattern,
    columns: Range<usize>,
    accept: impl Fn(&Permutation) -> bool,
) -> Result<Distinct<TupleScan>> {
    let (scan, seen) = match tuples.find_preferring(pattern, accept)? {
        Some(scan) => (scan, None),
        None => (tuples.find(pattern)?, Some(HashSet::new())),
    };
    Ok(Distinct {
        inner: scan,
        columns,
        last: None,
        seen,
    })
}

pub(crate) struct Distinct<I> {
    inner: I,
    columns: Range<usize>,
    last: Option<Tuple>,
    seen: Option<HashSet<Tuple>>,
}

impl<I: Iterator<Item = Result<Tuple>>> Iterator for Distinct<I> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let tuple = match self.inner.next()? {
                Ok(tuple) => tuple,
                Err(err) => return Some(Err(err)),
            };
            let projected = Tuple::new(tuple[self.columns.clone()].to_vec());
            let fresh = match &mut self.seen {
                Some(seen) => seen.insert(projected.clone()),
                None => self.last.as_ref() != Some(&projected),
            };
            if fresh {
                self.last = Some(projected.clone());
                return Some(Ok(projected));
            }
        }
    }
}

macro_rules! boxed_iter {
    ($(#[$doc:meta])* $name:ident, $item:ty) => {
        $(#[$doc])*
        pub struct $name(Box<dyn Iterator<Item = Result<$item>> + Send>);

        impl $name {
            pub(crate) fn new(inner: impl Iterator<Item = Result<$item>> + Send + 'static) -> Self {
                Self(Box::new(inner))
            }
        }

        impl Iterator for $name {
            type Item = Result<$item>;

            fn next(&mut self) -> Option<Self::Item> {
                self.0.next()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(stringify!($name))
            }
        }
    };
}

boxed_iter!(
    /// Lazy quads; terms are resolved as the iterator is consumed.
    QuadIter,
    Quad
);
boxed_iter!(
    /// Lazy triples of one graph view.
    TripleIter,
    Triple
);
boxed_iter!(
    /// Lazy distinct graph names.
    GraphNodeIter,
    Term
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;
    use oxigraph::model::NamedNode;

    fn iri(value: &str) -> Term {
        NamedNode::new_unchecked(format!("http://example.org/{value}")).into()
    }

    #[test]
    fn test_default_and_named_dispatch() {
        let dataset = Dataset::in_memory().unwrap();
        assert!(dataset
            .add_quad(&Quad::new(
                default_graph_name(),
                iri("a"),
                iri("p"),
                iri("b")
            ))
            .unwrap());
        assert!(dataset
            .add_quad(&Quad::new(iri("g1"), iri("a"), iri("p"), iri("c")))
            .unwrap());

        assert_eq!(dataset.triple_table().len(), 1);
        assert_eq!(dataset.quad_table().len(), 1);
        assert_eq!(dataset.len().unwrap(), 2);

        let all: Vec<Quad> = dataset
            .find_quads(None, None, None, None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_default_graph());
        assert_eq!(all[1].graph, iri("g1"));
    }

    #[test]
    fn test_distinct_falls_back_to_hash_set() {
        let names = vec!["SPOG".to_string()];
        let table = TupleTable::in_memory(4, &names, 2).unwrap();
        for (g, s) in [(1, 5), (2, 5), (1, 6), (3, 5)] {
            table
                .add(&[
                    NodeId::new(g),
                    NodeId::new(s),
                    NodeId::new(9),
                    NodeId::new(9),
                ])
                .unwrap();
        }
        let pattern = TuplePattern::any(4);
        let graphs: Vec<Tuple> =
            distinct_projection(&table, &pattern, 0..1, |p| p.first_column() == 0)
                .unwrap()
                .map(Result::unwrap)
                .collect();
        assert_eq!(graphs.len(), 3);
    }

    #[test]
    fn test_closed_dataset_rejects_calls() {
        let dataset = Dataset::in_memory().unwrap();
        dataset.close().unwrap();
        assert!(dataset.is_closed());
        assert!(matches!(dataset.len(), Err(StoreError::Closed)));
        assert!(matches!(dataset.sync(true), Err(StoreError::Closed)));
        assert!(matches!(
            dataset
                .default_graph()
                .add(&Triple::new(iri("a"), iri("p"), iri("b"))),
            Err(StoreError::Closed)
        ));
    }
}
