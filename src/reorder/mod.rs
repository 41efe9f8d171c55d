//! Basic graph pattern reordering
//!
//! A [`ReorderTransformation`] picks an evaluation order for a list of triple
//! patterns so that the most selective ones run first. Placement is greedy:
//! once a pattern is placed, its variables count as bound for the patterns
//! still waiting.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use oxigraph::model::vocab::rdf;
use oxigraph::model::{BlankNode, Literal, NamedNode, Term};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::stats::Statistics;

/// One position of a triple pattern
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternNode {
    /// Named variable; bound once an earlier pattern mentions it
    Variable(String),
    Term(Term),
    /// Anonymous wildcard, never bound
    Any,
}

impl PatternNode {
    pub fn variable(name: impl Into<String>) -> Self {
        PatternNode::Variable(name.into())
    }

    fn is_bound(&self, bound: &HashSet<&str>) -> bool {
        match self {
            PatternNode::Term(_) => true,
            PatternNode::Variable(name) => bound.contains(name.as_str()),
            PatternNode::Any => false,
        }
    }

    fn as_variable(&self) -> Option<&str> {
        match self {
            PatternNode::Variable(name) => Some(name),
            _ => None,
        }
    }
}

impl From<Term> for PatternNode {
    fn from(term: Term) -> Self {
        PatternNode::Term(term)
    }
}

impl From<NamedNode> for PatternNode {
    fn from(node: NamedNode) -> Self {
        PatternNode::Term(node.into())
    }
}

impl From<BlankNode> for PatternNode {
    fn from(node: BlankNode) -> Self {
        PatternNode::Term(node.into())
    }
}

impl From<Literal> for PatternNode {
    fn from(literal: Literal) -> Self {
        PatternNode::Term(literal.into())
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternNode::Variable(name) => write!(f, "?{name}"),
            PatternNode::Term(term) => write!(f, "{term}"),
            PatternNode::Any => f.write_str("ANY"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: PatternNode,
    pub predicate: PatternNode,
    pub object: PatternNode,
}

impl TriplePattern {
    pub fn new(
        subject: impl Into<PatternNode>,
        predicate: impl Into<PatternNode>,
        object: impl Into<PatternNode>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    fn positions(&self) -> [&PatternNode; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    fn bound_positions(&self, bound: &HashSet<&str>) -> usize {
        self.positions()
            .iter()
            .filter(|node| node.is_bound(bound))
            .count()
    }

    fn variables(&self) -> impl Iterator<Item = &str> {
        self.positions()
            .into_iter()
            .filter_map(PatternNode::as_variable)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

/// Strategy names accepted in configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReorderKind {
    None,
    Fixed,
    Weighted,
}

impl FromStr for ReorderKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "identity" => Ok(ReorderKind::None),
            "fixed" => Ok(ReorderKind::Fixed),
            "weighted" | "stats" => Ok(ReorderKind::Weighted),
            other => Err(StoreError::Config(format!(
                "unknown reorder strategy: {other}"
            ))),
        }
    }
}

static DEFAULT_REORDER: RwLock<Option<ReorderKind>> = parking_lot::const_rwlock(None);

/// Process-wide fallback used when a store configures no strategy.
pub fn set_default_reorder(kind: Option<ReorderKind>) {
    *DEFAULT_REORDER.write() = kind;
}

pub fn default_reorder() -> Option<ReorderKind> {
    *DEFAULT_REORDER.read()
}

#[derive(Clone, Debug, Default)]
pub enum ReorderTransformation {
    #[default]
    Identity,
    /// Ordering by pattern shape alone
    Fixed,
    /// Ordering by predicate frequencies
    Weighted(Arc<Statistics>),
}

impl ReorderTransformation {
    pub fn name(&self) -> &'static str {
        match self {
            ReorderTransformation::Identity => "identity",
            ReorderTransformation::Fixed => "fixed",
            ReorderTransformation::Weighted(_) => "weighted",
        }
    }

    pub fn reorder(&self, patterns: &[TriplePattern]) -> Vec<TriplePattern> {
        self.reorder_indexes(patterns)
            .into_iter()
            .map(|i| patterns[i].clone())
            .collect()
    }

    /// Positions of `patterns` in evaluation order
    pub fn reorder_indexes(&self, patterns: &[TriplePattern]) -> Vec<usize> {
        match self {
            ReorderTransformation::Identity => (0..patterns.len()).collect(),
            ReorderTransformation::Fixed => greedy(patterns, fixed_weight),
            ReorderTransformation::Weighted(stats) => greedy(patterns, |pattern, bound| {
                weighted_estimate(stats, pattern, bound)
            }),
        }
    }
}

/// Weighted reorder of `patterns` against `statistics`.
pub fn reorder(statistics: &Statistics, patterns: &[TriplePattern]) -> Vec<TriplePattern> {
    greedy(patterns, |pattern, bound| {
        weighted_estimate(statistics, pattern, bound)
    })
    .into_iter()
    .map(|i| patterns[i].clone())
    .collect()
}

/// Choose the strategy for a store.
///
/// Precedence: `none` configured, then weighted when statistics exist, then
/// `fixed` configured, then the process default, then identity.
pub fn select(
    configured: Option<&str>,
    statistics: Option<Arc<Statistics>>,
) -> Result<ReorderTransformation> {
    let configured = configured.map(str::parse::<ReorderKind>).transpose()?;
    let chosen = match (configured, statistics) {
        (Some(ReorderKind::None), _) => ReorderTransformation::Identity,
        (_, Some(stats)) => ReorderTransformation::Weighted(stats),
        (Some(ReorderKind::Fixed), None) => ReorderTransformation::Fixed,
        _ => match default_reorder() {
            Some(ReorderKind::Fixed) => ReorderTransformation::Fixed,
            _ => ReorderTransformation::Identity,
        },
    };
    debug!("Selected {} reorder", chosen.name());
    Ok(chosen)
}

fn greedy(
    patterns: &[TriplePattern],
    weigh: impl Fn(&TriplePattern, &HashSet<&str>) -> u64,
) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..patterns.len()).collect();
    let mut bound: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(patterns.len());

    while !remaining.is_empty() {
        // min_by_key keeps the first of equal keys, so input order breaks the last tie
        let Some((slot, _)) = remaining.iter().enumerate().min_by_key(|&(_, &i)| {
            let pattern = &patterns[i];
            (
                weigh(pattern, &bound),
                Reverse(pattern.bound_positions(&bound)),
            )
        }) else {
            break;
        };
        let chosen = remaining.remove(slot);
        bound.extend(patterns[chosen].variables());
        order.push(chosen);
    }
    order
}

fn fixed_weight(pattern: &TriplePattern, bound: &HashSet<&str>) -> u64 {
    let s = pattern.subject.is_bound(bound);
    let p = pattern.predicate.is_bound(bound);
    let o = pattern.object.is_bound(bound);
    let is_type = matches!(
        &pattern.predicate,
        PatternNode::Term(Term::NamedNode(node)) if node.as_str() == rdf::TYPE.as_str()
    );

    match (s, p, o) {
        (true, true, true) => 1,
        (false, true, true) if is_type => 5,
        (false, true, true) => 2,
        (true, true, false) => 3,
        (true, false, true) => 4,
        (true, false, false) => 10,
        (false, false, true) => 20,
        (false, true, false) => 30,
        (false, false, false) => 100,
    }
}

fn weighted_estimate(stats: &Statistics, pattern: &TriplePattern, bound: &HashSet<&str>) -> u64 {
    let estimate = match &pattern.predicate {
        PatternNode::Term(predicate) => stats.count(predicate),
        PatternNode::Variable(name) if bound.contains(name.as_str()) => {
            stats.total() / (stats.predicate_count() as u64).max(1)
        }
        _ => stats.total(),
    };
    if pattern.bound_positions(bound) == 3 {
        estimate.min(1)
    } else {
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iri(value: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.org/{value}"))
    }

    fn var(name: &str) -> PatternNode {
        PatternNode::variable(name)
    }

    #[test]
    fn test_fixed_prefers_bound_shapes() {
        let patterns = vec![
            TriplePattern::new(var("x"), var("p"), var("y")),
            TriplePattern::new(var("x"), rdf::TYPE.into_owned(), iri("Person")),
            TriplePattern::new(iri("alice"), iri("knows"), var("x")),
        ];
        let order = ReorderTransformation::Fixed.reorder_indexes(&patterns);
        // BBV (3) first; then ?x is bound so the type pattern is BBB
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_type_pattern_weighs_more_than_plain_vbb() {
        let bound = HashSet::new();
        let typed = TriplePattern::new(var("x"), rdf::TYPE.into_owned(), iri("Person"));
        let plain = TriplePattern::new(var("x"), iri("name"), iri("Alice"));
        assert_eq!(fixed_weight(&typed, &bound), 5);
        assert_eq!(fixed_weight(&plain, &bound), 2);
    }

    #[test]
    fn test_identity_keeps_order() {
        let patterns = vec![
            TriplePattern::new(var("a"), var("b"), var("c")),
            TriplePattern::new(iri("s"), iri("p"), iri("o")),
        ];
        assert_eq!(ReorderTransformation::Identity.reorder(&patterns), patterns);
    }

    #[test]
    fn test_weighted_ties_prefer_more_bound() {
        let stats = Statistics::new(10, [(iri("p").into_string(), 4)].into());
        let patterns = vec![
            TriplePattern::new(var("x"), iri("p"), var("y")),
            TriplePattern::new(iri("s"), iri("p"), var("z")),
        ];
        assert_eq!(
            ReorderTransformation::Weighted(Arc::new(stats)).reorder_indexes(&patterns),
            vec![1, 0]
        );
    }

    #[test]
    fn test_weighted_unknown_predicate_first() {
        let stats = Statistics::new(10, [(iri("p").into_string(), 10)].into());
        let patterns = vec![
            TriplePattern::new(var("x"), iri("p"), var("y")),
            TriplePattern::new(var("x"), iri("rare"), var("y")),
        ];
        assert_eq!(reorder(&stats, &patterns)[0], patterns[1]);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            "Weighted".parse::<ReorderKind>().unwrap(),
            ReorderKind::Weighted
        );
        assert_eq!(
            "identity".parse::<ReorderKind>().unwrap(),
            ReorderKind::None
        );
        assert!(matches!(
            "random".parse::<ReorderKind>(),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            select(Some("random"), None),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_select_precedence() {
        let stats = Arc::new(Statistics::default());
        assert_eq!(
            select(Some("none"), Some(stats.clone())).unwrap().name(),
            "identity"
        );
        assert_eq!(
            select(None, Some(stats.clone())).unwrap().name(),
            "weighted"
        );
        assert_eq!(
            select(Some("fixed"), Some(stats)).unwrap().name(),
            "weighted"
        );
        assert_eq!(select(Some("fixed"), None).unwrap().name(), "fixed");
        assert_eq!(select(Some("weighted"), None).unwrap().name(), "identity");
    }
}
