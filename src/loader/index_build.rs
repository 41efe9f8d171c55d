//! Secondary index construction from a primary index
//!
//! All three strategies read the primary in sorted order and produce the same
//! index contents; they differ only in how the passes are scheduled.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::loader::progress::ProgressMonitor;
use crate::storage::indexing::permutation::Permutation;
use crate::storage::indexing::tuple_index::TupleIndex;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum IndexBuild {
    /// One pass over the primary per secondary index
    Sequential,
    /// One pass over the primary feeding every secondary index
    #[default]
    Interleaved,
    /// One worker thread per secondary index, each with its own pass
    Parallel,
}

impl IndexBuild {
    pub fn name(self) -> &'static str {
        match self {
            IndexBuild::Sequential => "sequential",
            IndexBuild::Interleaved => "interleaved",
            IndexBuild::Parallel => "parallel",
        }
    }
}

impl fmt::Display for IndexBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexBuild {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(IndexBuild::Sequential),
            "interleaved" => Ok(IndexBuild::Interleaved),
            "parallel" => Ok(IndexBuild::Parallel),
            other => Err(StoreError::Config(format!(
                "unknown index build strategy: {other}"
            ))),
        }
    }
}

/// Build one index per target permutation holding every tuple of `primary`.
///
/// Results come back in the order of `targets`. Every insert ticks `monitor`.
pub fn build_indexes(
    primary: &TupleIndex,
    targets: Vec<Permutation>,
    strategy: IndexBuild,
    monitor: &ProgressMonitor,
) -> Result<Vec<TupleIndex>> {
    debug!(
        "Building {} index(es) from {} with the {strategy} strategy",
        targets.len(),
        primary.name()
    );
    let mut built = match strategy {
        IndexBuild::Sequential => targets
            .into_iter()
            .map(|target| build_one(primary, target, monitor))
            .collect(),
        IndexBuild::Interleaved => build_interleaved(primary, targets, monitor),
        IndexBuild::Parallel => build_parallel(primary, targets, monitor)?,
    };
    for index in &mut built {
        index.mark_dirty();
    }
    Ok(built)
}

fn build_one(primary: &TupleIndex, target: Permutation, monitor: &ProgressMonitor) -> TupleIndex {
    let mut index = TupleIndex::new(target);
    for tuple in primary.iter() {
        index.insert(&tuple);
        monitor.tick();
    }
    index
}

fn build_interleaved(
    primary: &TupleIndex,
    targets: Vec<Permutation>,
    monitor: &ProgressMonitor,
) -> Vec<TupleIndex> {
    let mut indexes: Vec<TupleIndex> = targets.into_iter().map(TupleIndex::new).collect();
    let width = indexes.len() as u64;
    for tuple in primary.iter() {
        for index in &mut indexes {
            index.insert(&tuple);
        }
        monitor.tick_n(width);
    }
    indexes
}

fn build_parallel(
    primary: &TupleIndex,
    targets: Vec<Permutation>,
    monitor: &ProgressMonitor,
) -> Result<Vec<TupleIndex>> {
    std::thread::scope(|scope| {
        let workers: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let name = target.name().to_string();
                let handle = std::thread::Builder::new()
                    .name(format!("index-build-{name}"))
                    .spawn_scoped(scope, move || build_one(primary, target, monitor));
                (name, handle)
            })
            .collect();

        workers
            .into_iter()
            .map(|(name, handle)| {
                handle?.join().map_err(|_| {
                    StoreError::Inconsistent(format!("index build worker for {name} panicked"))
                })
            })
            .collect()
    })
}
