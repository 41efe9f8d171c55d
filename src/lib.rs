//! # Quadstore
//!
//! Quadstore is a persistent RDF triple and quad store. RDF terms are
//! interned into 64-bit node ids by a node table, and tuples of node ids are
//! kept in several sorted indexes, each under a different column permutation,
//! so that any triple or quad pattern can be answered by a prefix range scan.
//!
//! ## Features
//!
//! - Node table with an append-only value log and a persistent hash index
//! - Triple and quad tables over permuted tuple indexes kept in agreement
//! - Dataset with a default graph, named graphs and a read-only union graph
//! - Bulk loader with sequential, interleaved and parallel index builds
//! - Predicate statistics and a pattern reorder driven by them
//!
//! ## Example
//!
//! ```rust
//! use oxigraph::model::NamedNode;
//! use quadstore::{Dataset, Result, Triple};
//!
//! fn example() -> Result<()> {
//!     let dataset = Dataset::in_memory()?;
//!     let graph = dataset.default_graph();
//!     let knows = NamedNode::new_unchecked("http://xmlns.com/foaf/0.1/knows");
//!     graph.add(&Triple::new(
//!         NamedNode::new_unchecked("http://example.org/alice"),
//!         knows.clone(),
//!         NamedNode::new_unchecked("http://example.org/bob"),
//!     ))?;
//!     assert_eq!(graph.find(None, Some(&knows.into()), None)?.count(), 1);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::unnecessary_map_or)]
#![allow(clippy::len_without_is_empty)]

/// Core data structures and types
pub mod core;

/// Dataset and graph views
pub mod dataset;

/// Error types and result definitions
pub mod error;

/// Bulk loading and index building
pub mod loader;

/// Pattern reordering
pub mod reorder;

/// Predicate statistics
pub mod stats;

pub mod storage;

// Re-export commonly used types
pub use crate::core::{NodeId, Quad, Triple, Tuple, TuplePattern};
pub use dataset::{Dataset, Graph, GraphKind};
pub use error::{Result, StoreError};
pub use loader::{BulkLoader, IndexBuild, LoadReport, LoadTarget, LoaderOptions, LoaderState};
pub use reorder::{PatternNode, ReorderTransformation, TriplePattern};
pub use stats::Statistics;
pub use storage::util::StoreConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Config("test error".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test error");
    }
}
