//! Column permutations naming a tuple index's sort order
//!
//! A permutation is written with column letters: `SPO`, `POS`, `GSPO`, ...
//! Canonical column order is `SPO` for triples and `GSPO` for quads; the
//! letters of an index name say which canonical column sits at each key
//! position.

use std::fmt;

use crate::core::{NodeId, TuplePattern};
use crate::error::{Result, StoreError};

const TRIPLE_COLUMNS: &str = "SPO";
const QUAD_COLUMNS: &str = "GSPO";

/// Canonical column letters for a tuple arity
pub fn canonical_columns(arity: usize) -> Result<&'static str> {
    match arity {
        3 => Ok(TRIPLE_COLUMNS),
        4 => Ok(QUAD_COLUMNS),
        other => Err(StoreError::Config(format!(
            "unsupported tuple arity {other}"
        ))),
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Permutation {
    name: String,
    /// `order[i]` is the canonical column stored at key position `i`
    order: Vec<usize>,
}

impl Permutation {
    /// Parse an index name such as `POS` for tuples of `arity` columns.
    pub fn parse(arity: usize, name: &str) -> Result<Self> {
        let canonical = canonical_columns(arity)?;
        let name = name.trim().to_ascii_uppercase();
        if name.len() != arity {
            return Err(StoreError::Config(format!(
                "index {name} does not have {arity} columns ({canonical})"
            )));
        }

        let mut order = Vec::with_capacity(arity);
        for letter in name.chars() {
            let column = canonical.find(letter).ok_or_else(|| {
                StoreError::Config(format!("index {name}: unknown column {letter}"))
            })?;
            if order.contains(&column) {
                return Err(StoreError::Config(format!(
                    "index {name}: column {letter} repeated"
                )));
            }
            order.push(column);
        }
        Ok(Self { name, order })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn arity(&self) -> usize {
        self.order.len()
    }

    pub fn first_column(&self) -> usize {
        self.order[0]
    }

    pub fn last_column(&self) -> usize {
        self.order[self.order.len() - 1]
    }

    /// Number of leading key positions bound by `pattern`
    pub fn prefix_len(&self, pattern: &TuplePattern) -> usize {
        self.order
            .iter()
            .take_while(|&&column| pattern.is_bound(column))
            .count()
    }

    /// The bound leading ids of `pattern`, in key order
    pub fn prefix_ids(&self, pattern: &TuplePattern) -> Vec<NodeId> {
        self.order
            .iter()
            .map_while(|&column| pattern.column(column))
            .collect()
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
