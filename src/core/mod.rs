//! Core data structures and types for the quad store
//!
//! Terms come from the oxigraph model; everything below the node table works
//! on [`NodeId`]s, arranged in fixed-arity [`Tuple`]s.

use oxigraph::model::{GraphName, NamedNode, Term};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Name of the default (unnamed) graph when it has to be spelled as a term
pub const DEFAULT_GRAPH_IRI: &str = "urn:x-arq:DefaultGraph";

/// Name of the read-only union of all named graphs
pub const UNION_GRAPH_IRI: &str = "urn:x-arq:UnionGraph";

/// Fixed-width identifier of an interned term.
///
/// Ids are byte offsets into the node table's value log, so they are dense
/// only in the sense that no two terms share one. The top two values are
/// reserved and never handed out.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Sentinel for "term not present" in read-only lookups
    pub const NOT_PRESENT: NodeId = NodeId(u64::MAX);

    /// Graph column value standing for the default graph
    pub const DEFAULT_GRAPH: NodeId = NodeId(u64::MAX - 1);

    pub const fn new(value: u64) -> Self {
        NodeId(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the sentinels above
    pub const fn is_reserved(self) -> bool {
        self.0 >= u64::MAX - 1
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A stored row of node ids, in canonical column order (S,P,O or G,S,P,O).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Tuple(Vec<NodeId>);

impl Tuple {
    pub fn new(ids: Vec<NodeId>) -> Self {
        Tuple(ids)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<NodeId> {
        self.0
    }
}

impl Deref for Tuple {
    type Target = [NodeId];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[NodeId; 3]> for Tuple {
    fn from(ids: [NodeId; 3]) -> Self {
        Tuple(ids.to_vec())
    }
}

impl From<[NodeId; 4]> for Tuple {
    fn from(ids: [NodeId; 4]) -> Self {
        Tuple(ids.to_vec())
    }
}

/// A query over tuples: `None` columns are wildcards.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TuplePattern(Vec<Option<NodeId>>);

impl TuplePattern {
    pub fn new(columns: Vec<Option<NodeId>>) -> Self {
        TuplePattern(columns)
    }

    /// Pattern with every column wildcarded
    pub fn any(arity: usize) -> Self {
        TuplePattern(vec![None; arity])
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn column(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied().flatten()
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.column(index).is_some()
    }

    pub fn bound_count(&self) -> usize {
        self.0.iter().filter(|c| c.is_some()).count()
    }

    pub fn matches(&self, tuple: &[NodeId]) -> bool {
        tuple.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(tuple)
                .all(|(want, got)| want.map_or(true, |id| id == *got))
    }
}

impl From<&Tuple> for TuplePattern {
    fn from(tuple: &Tuple) -> Self {
        TuplePattern(tuple.iter().copied().map(Some).collect())
    }
}

/// A triple of terms. Any term kind may appear in any position.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(
        subject: impl Into<Term>,
        predicate: impl Into<Term>,
        object: impl Into<Term>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    pub fn in_graph(self, graph: impl Into<Term>) -> Quad {
        Quad {
            graph: graph.into(),
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
        }
    }

    pub(crate) fn from_terms(terms: Vec<Term>) -> Option<Self> {
        let [subject, predicate, object]: [Term; 3] = terms.try_into().ok()?;
        Some(Self {
            subject,
            predicate,
            object,
        })
    }
}

impl From<oxigraph::model::Triple> for Triple {
    fn from(triple: oxigraph::model::Triple) -> Self {
        Self::new(triple.subject, triple.predicate, triple.object)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A triple together with the graph it lives in.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Quad {
    pub graph: Term,
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Quad {
    pub fn new(
        graph: impl Into<Term>,
        subject: impl Into<Term>,
        predicate: impl Into<Term>,
        object: impl Into<Term>,
    ) -> Self {
        Self {
            graph: graph.into(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    pub fn triple(&self) -> Triple {
        Triple::new(
            self.subject.clone(),
            self.predicate.clone(),
            self.object.clone(),
        )
    }

    pub fn is_default_graph(&self) -> bool {
        is_default_graph(&self.graph)
    }

    pub(crate) fn from_terms(terms: Vec<Term>) -> Option<Self> {
        let [graph, subject, predicate, object]: [Term; 4] = terms.try_into().ok()?;
        Some(Self {
            graph,
            subject,
            predicate,
            object,
        })
    }
}

impl From<oxigraph::model::Quad> for Quad {
    fn from(quad: oxigraph::model::Quad) -> Self {
        let graph: Term = match quad.graph_name {
            GraphName::NamedNode(node) => node.into(),
            GraphName::BlankNode(node) => node.into(),
            GraphName::DefaultGraph => default_graph_name(),
        };
        Self::new(graph, quad.subject, quad.predicate, quad.object)
    }
}

impl fmt::Display for Quad {
    /// N-Quads line; the default graph is written without a graph label.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_graph() {
            write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
        } else {
            write!(
                f,
                "{} {} {} {} .",
                self.subject, self.predicate, self.object, self.graph
            )
        }
    }
}

pub fn default_graph_name() -> Term {
    NamedNode::new_unchecked(DEFAULT_GRAPH_IRI).into()
}

pub fn union_graph_name() -> Term {
    NamedNode::new_unchecked(UNION_GRAPH_IRI).into()
}

pub fn is_default_graph(term: &Term) -> bool {
    matches!(term, Term::NamedNode(node) if node.as_str() == DEFAULT_GRAPH_IRI)
}

pub fn is_union_graph(term: &Term) -> bool {
    matches!(term, Term::NamedNode(node) if node.as_str() == UNION_GRAPH_IRI)
}

pub mod encoding;
pub use encoding::*;
