//! Per-graph views over a [`Dataset`]

use oxigraph::model::Term;

use crate::core::{default_graph_name, union_graph_name, Triple, TuplePattern};
use crate::dataset::{distinct_projection, to_triple, Dataset, TripleIter};
use crate::error::{Result, StoreError};
use crate::storage::node_tuple_table::TermTupleIter;

/// Which table a view reads, and with which graph column value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphKind {
    /// The triple table
    Default,
    /// The quad table with the graph column fixed
    Named(Term),
    /// Distinct triples of every named graph; read-only
    Union,
}

/// A stateless graph view; create and drop freely.
#[derive(Clone, Debug)]
pub struct Graph {
    dataset: Dataset,
    kind: GraphKind,
}

impl Graph {
    pub(crate) fn new(dataset: Dataset, kind: GraphKind) -> Self {
        Self { dataset, kind }
    }

    pub fn kind(&self) -> &GraphKind {
        &self.kind
    }

    pub fn name(&self) -> Term {
        match &self.kind {
            GraphKind::Default => default_graph_name(),
            GraphKind::Named(name) => name.clone(),
            GraphKind::Union => union_graph_name(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn read_only(&self) -> StoreError {
        StoreError::Unsupported(format!("graph {} is read-only", self.name()))
    }

    pub fn add(&self, triple: &Triple) -> Result<bool> {
        self.dataset.check_open()?;
        let Triple {
            subject,
            predicate,
            object,
        } = triple.clone();
        match &self.kind {
            GraphKind::Default => self
                .dataset
                .triple_table()
                .add(&[subject, predicate, object]),
            GraphKind::Named(graph) => {
                self.dataset
                    .quad_table()
                    .add(&[graph.clone(), subject, predicate, object])
            }
            GraphKind::Union => Err(self.read_only()),
        }
    }

    /// Deleting a triple the graph does not hold is a no-op returning false.
    pub fn delete(&self, triple: &Triple) -> Result<bool> {
        self.dataset.check_open()?;
        let Triple {
            subject,
            predicate,
            object,
        } = triple.clone();
        match &self.kind {
            GraphKind::Default => self
                .dataset
                .triple_table()
                .delete(&[subject, predicate, object]),
            GraphKind::Named(graph) => {
                self.dataset
                    .quad_table()
                    .delete(&[graph.clone(), subject, predicate, object])
            }
            GraphKind::Union => Err(self.read_only()),
        }
    }

    pub fn contains(&self, triple: &Triple) -> Result<bool> {
        self.dataset.check_open()?;
        let Triple {
            subject,
            predicate,
            object,
        } = triple.clone();
        match &self.kind {
            GraphKind::Default => self
                .dataset
                .triple_table()
                .contains(&[subject, predicate, object]),
            GraphKind::Named(graph) => {
                self.dataset
                    .quad_table()
                    .contains(&[graph.clone(), subject, predicate, object])
            }
            GraphKind::Union => {
                let mut found = self.find(Some(&subject), Some(&predicate), Some(&object))?;
                found.next().transpose().map(|first| first.is_some())
            }
        }
    }

    /// Triples matching the pattern; `None` positions are wildcards.
    pub fn find(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<TripleIter> {
        self.dataset.check_open()?;
        match &self.kind {
            GraphKind::Default => {
                let terms = self
                    .dataset
                    .triple_table()
                    .find(&[subject, predicate, object])?;
                Ok(TripleIter::new(terms.map(
                    |terms: Result<Vec<Term>>| -> Result<Triple> { to_triple(terms?) },
                )))
            }
            GraphKind::Named(graph) => {
                let terms =
                    self.dataset
                        .quad_table()
                        .find(&[Some(graph), subject, predicate, object])?;
                Ok(TripleIter::new(terms.map(
                    |terms: Result<Vec<Term>>| -> Result<Triple> {
                        let mut terms = terms?;
                        if !terms.is_empty() {
                            terms.remove(0);
                        }
                        to_triple(terms)
                    },
                )))
            }
            GraphKind::Union => self.find_union(subject, predicate, object),
        }
    }

    /// Distinct triples over all named graphs, read from a graph-last quad
    /// index so that one triple's graphs are adjacent.
    fn find_union(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<TripleIter> {
        let quads = self.dataset.quad_table();
        let Some(pattern) = quads.to_id_pattern(&[None, subject, predicate, object])? else {
            return Ok(TripleIter::new(std::iter::empty()));
        };
        let graph_column = 0;
        let arity = quads.arity();
        let triples = distinct_projection(quads.tuples(), &pattern, 1..arity, |permutation| {
            permutation.last_column() == graph_column
        })?;
        let terms = TermTupleIter::new(std::sync::Arc::clone(self.dataset.nodes()), triples);
        Ok(TripleIter::new(terms.map(
            |terms: Result<Vec<Term>>| -> Result<Triple> { to_triple(terms?) },
        )))
    }

    /// Number of triples in the view
    pub fn len(&self) -> Result<usize> {
        self.dataset.check_open()?;
        match &self.kind {
            GraphKind::Default => Ok(self.dataset.triple_table().len()),
            GraphKind::Named(graph) => {
                let quads = self.dataset.quad_table();
                let Some(pattern) = quads.to_id_pattern(&[Some(graph), None, None, None])? else {
                    return Ok(0);
                };
                count(quads.find_ids(&pattern)?)
            }
            GraphKind::Union => count(self.find(None, None, None)?),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        match &self.kind {
            GraphKind::Default => Ok(self.len()? == 0),
            _ => Ok(self.find(None, None, None)?.next().transpose()?.is_none()),
        }
    }

    /// Delete every triple of the view; returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        self.dataset.check_open()?;
        match &self.kind {
            GraphKind::Default => self
                .dataset
                .triple_table()
                .delete_matching(&[None, None, None]),
            GraphKind::Named(graph) => {
                self.dataset
                    .quad_table()
                    .delete_matching(&[Some(graph), None, None, None])
            }
            GraphKind::Union => Err(self.read_only()),
        }
    }
}

fn count<T>(items: impl Iterator<Item = Result<T>>) -> Result<usize> {
    let mut n = 0;
    for item in items {
        item?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::NamedNode;

    fn iri(value: &str) -> Term {
        NamedNode::new_unchecked(format!("http://example.org/{value}")).into()
    }

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(iri(s), iri(p), iri(o))
    }

    #[test]
    fn test_named_graph_view() {
        let dataset = Dataset::in_memory().unwrap();
        let g1 = dataset.graph(&iri("g1"));
        let g2 = dataset.graph(&iri("g2"));

        assert!(g1.add(&triple("a", "p", "b")).unwrap());
        assert!(g2.add(&triple("a", "p", "b")).unwrap());
        assert!(g1.add(&triple("a", "q", "c")).unwrap());

        assert_eq!(g1.len().unwrap(), 2);
        assert_eq!(g2.len().unwrap(), 1);
        assert!(dataset.default_graph().is_empty().unwrap());

        let found: Vec<Triple> = g1
            .find(None, Some(&iri("q")), None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(found, vec![triple("a", "q", "c")]);
        assert_eq!(g1.name(), iri("g1"));
    }

    #[test]
    fn test_union_graph_is_distinct_and_read_only() {
        let dataset = Dataset::in_memory().unwrap();
        dataset
            .graph(&iri("g1"))
            .add(&triple("a", "p", "b"))
            .unwrap();
        dataset
            .graph(&iri("g2"))
            .add(&triple("a", "p", "b"))
            .unwrap();
        dataset
            .graph(&iri("g2"))
            .add(&triple("c", "p", "d"))
            .unwrap();

        let union = dataset.union_graph();
        assert_eq!(union.len().unwrap(), 2);
        assert!(union.contains(&triple("c", "p", "d")).unwrap());
        assert!(!union.contains(&triple("c", "p", "x")).unwrap());
        assert!(matches!(
            union.add(&triple("x", "y", "z")),
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(union.clear(), Err(StoreError::Unsupported(_))));
        assert_eq!(dataset.graph(&union_graph_name()).kind(), &GraphKind::Union);
    }

    #[test]
    fn test_clear_named_graph_leaves_others() {
        let dataset = Dataset::in_memory().unwrap();
        dataset
            .graph(&iri("g1"))
            .add(&triple("a", "p", "b"))
            .unwrap();
        dataset
            .graph(&iri("g2"))
            .add(&triple("a", "p", "b"))
            .unwrap();
        dataset.default_graph().add(&triple("a", "p", "b")).unwrap();

        assert_eq!(dataset.graph(&iri("g1")).clear().unwrap(), 1);
        assert!(dataset.graph(&iri("g1")).is_empty().unwrap());
        assert_eq!(dataset.graph(&iri("g2")).len().unwrap(), 1);
        assert_eq!(dataset.default_graph().len().unwrap(), 1);
    }
}
