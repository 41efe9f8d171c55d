//! A relation of fixed-arity tuples held under several permutations
//!
//! The first index is the primary: it decides whether an add or delete
//! changed anything and it is the source for rebuilding the others. Every
//! successful change is applied to all present indexes under one write lock,
//! so readers never observe a tuple in one index and not in another.
//!
//! Secondary indexes may be absent (`None`) between `drop_secondaries` and
//! `rebuild_secondaries`; that window is only opened by the bulk loader.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info, warn};

use crate::core::encoding::encode_prefix;
use crate::core::{NodeId, Tuple, TuplePattern};
use crate::error::{Result, StoreError};
use crate::loader::index_build::{build_indexes, IndexBuild};
use crate::loader::progress::ProgressMonitor;
use crate::storage::indexing::permutation::Permutation;
use crate::storage::indexing::tuple_index::TupleIndex;

#[derive(Debug)]
struct Secondary {
    permutation: Permutation,
    index: Option<TupleIndex>,
}

#[derive(Debug)]
struct IndexSet {
    primary: TupleIndex,
    secondaries: Vec<Secondary>,
}

/// Which index of the set a scan reads
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum IndexSlot {
    Primary,
    Secondary(usize),
}

impl IndexSet {
    fn get(&self, slot: IndexSlot) -> Option<&TupleIndex> {
        match slot {
            IndexSlot::Primary => Some(&self.primary),
            IndexSlot::Secondary(i) => self.secondaries.get(i).and_then(|s| s.index.as_ref()),
        }
    }

    /// Present indexes, primary first
    fn present(&self) -> impl Iterator<Item = (IndexSlot, &TupleIndex)> {
        std::iter::once((IndexSlot::Primary, &self.primary)).chain(
            self.secondaries.iter().enumerate().filter_map(|(i, s)| {
                s.index
                    .as_ref()
                    .map(|index| (IndexSlot::Secondary(i), index))
            }),
        )
    }

    fn present_mut(&mut self) -> impl Iterator<Item = &mut TupleIndex> {
        std::iter::once(&mut self.primary)
            .chain(self.secondaries.iter_mut().filter_map(|s| s.index.as_mut()))
    }

    /// Present index with the longest bound prefix accepted by `accept`; ties go to the earliest.
    fn choose(
        &self,
        pattern: &TuplePattern,
        accept: impl Fn(&Permutation) -> bool,
    ) -> Option<(IndexSlot, usize)> {
        let mut best: Option<(IndexSlot, usize)> = None;
        for (slot, index) in self
            .present()
            .filter(|(_, index)| accept(index.permutation()))
        {
            let len = index.permutation().prefix_len(pattern);
            if best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((slot, len));
            }
        }
        best
    }
}

#[derive(Debug)]
pub struct TupleTable {
    arity: usize,
    indexes: Arc<RwLock<IndexSet>>,
    location: Option<PathBuf>,
    batch_size: usize,
}

impl TupleTable {
    /// Table with no backing files over the named permutations, the first being primary.
    pub fn in_memory(arity: usize, index_names: &[String], batch_size: usize) -> Result<Self> {
        let permutations = parse_names(arity, index_names)?;
        let mut permutations = permutations.into_iter();
        let primary = permutations.next().ok_or_else(|| {
            StoreError::Config("a tuple table needs at least one index".to_string())
        })?;
        let secondaries = permutations
            .map(|permutation| Secondary {
                index: Some(TupleIndex::new(permutation.clone())),
                permutation,
            })
            .collect();
        Ok(Self {
            arity,
            indexes: Arc::new(RwLock::new(IndexSet {
                primary: TupleIndex::new(primary),
                secondaries,
            })),
            location: None,
            batch_size: batch_size.max(1),
        })
    }

    /// Open the index files under `dir`, creating empty indexes for a new table.
    ///
    /// A secondary index file missing next to a non-empty primary leaves that
    /// index absent; [`verify`](Self::verify) reports it.
    pub fn open(
        dir: &Path,
        arity: usize,
        index_names: &[String],
        batch_size: usize,
    ) -> Result<Self> {
        let table = Self::in_memory(arity, index_names, batch_size)?;
        let mut set = table.indexes.write();

        let primary_permutation = set.primary.permutation().clone();
        if let Some(primary) = TupleIndex::load(dir, primary_permutation)? {
            set.primary = primary;
        }
        let primary_empty = set.primary.is_empty();
        for secondary in &mut set.secondaries {
            secondary.index = match TupleIndex::load(dir, secondary.permutation.clone())? {
                Some(index) => Some(index),
                None if primary_empty => Some(TupleIndex::new(secondary.permutation.clone())),
                None => {
                    warn!(
                        "Index {} is missing under {}",
                        secondary.permutation,
                        dir.display()
                    );
                    None
                }
            };
        }
        debug!(
            "Opened {} tuple(s) of arity {arity} from {}",
            set.primary.len(),
            dir.display()
        );
        drop(set);

        Ok(Self {
            location: Some(dir.to_path_buf()),
            ..table
        })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    fn check_arity(&self, width: usize) -> Result<()> {
        if width != self.arity {
            return Err(StoreError::Inconsistent(format!(
                "tuple of {width} columns used with a table of arity {}",
                self.arity
            )));
        }
        Ok(())
    }

    /// Add a tuple to every present index; false if the primary already held it.
    pub fn add(&self, tuple: &[NodeId]) -> Result<bool> {
        self.check_arity(tuple.len())?;
        let mut set = self.indexes.write();
        if !set.primary.insert(tuple) {
            return Ok(false);
        }
        for secondary in set.secondaries.iter_mut().filter_map(|s| s.index.as_mut()) {
            secondary.insert(tuple);
        }
        Ok(true)
    }

    /// Delete a tuple from every present index; false if the primary did not hold it.
    pub fn delete(&self, tuple: &[NodeId]) -> Result<bool> {
        self.check_arity(tuple.len())?;
        let mut set = self.indexes.write();
        if !set.primary.delete(tuple) {
            return Ok(false);
        }
        for secondary in set.secondaries.iter_mut().filter_map(|s| s.index.as_mut()) {
            secondary.delete(tuple);
        }
        Ok(true)
    }

    pub fn contains(&self, tuple: &[NodeId]) -> Result<bool> {
        self.check_arity(tuple.len())?;
        Ok(self.indexes.read().primary.contains(tuple))
    }

    /// Lazily scan the tuples matching `pattern`.
    ///
    /// Reads the present index whose permutation binds the longest prefix of
    /// the pattern, or the primary with a per-tuple filter when none does.
    pub fn find(&self, pattern: &TuplePattern) -> Result<TupleScan> {
        self.check_arity(pattern.arity())?;
        let choice = self.indexes.read().choose(pattern, |_| true);
        let (slot, prefix_len) = choice.unwrap_or((IndexSlot::Primary, 0));
        Ok(self.scan_from(slot, prefix_len, pattern))
    }

    /// Like [`find`](Self::find), reading only an index whose permutation `accept`s.
    ///
    /// `None` when no such index is present. Results follow that index's order.
    pub fn find_preferring(
        &self,
        pattern: &TuplePattern,
        accept: impl Fn(&Permutation) -> bool,
    ) -> Result<Option<TupleScan>> {
        self.check_arity(pattern.arity())?;
        let choice = self.indexes.read().choose(pattern, accept);
        Ok(choice.map(|(slot, prefix_len)| self.scan_from(slot, prefix_len, pattern)))
    }

    fn scan_from(&self, slot: IndexSlot, prefix_len: usize, pattern: &TuplePattern) -> TupleScan {
        let prefix_ids = {
            let set = self.indexes.read();
            set.get(slot)
                .map(|index| index.permutation().prefix_ids(pattern))
                .unwrap_or_default()
        };
        TupleScan {
            indexes: Arc::clone(&self.indexes),
            slot,
            prefix: encode_prefix(&prefix_ids),
            filtered: prefix_len < pattern.bound_count(),
            pattern: pattern.clone(),
            last: None,
            buffer: VecDeque::new(),
            batch_size: self.batch_size,
            exhausted: false,
        }
    }

    /// Number of tuples in the primary index
    pub fn len(&self) -> usize {
        self.indexes.read().primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut set = self.indexes.write();
        for index in set.present_mut() {
            index.clear();
        }
    }

    /// Every configured index name, primary first, present or not
    pub fn index_names(&self) -> Vec<String> {
        let set = self.indexes.read();
        std::iter::once(set.primary.name().to_string())
            .chain(
                set.secondaries
                    .iter()
                    .map(|s| s.permutation.name().to_string()),
            )
            .collect()
    }

    /// Names of secondary indexes currently absent
    pub fn absent_indexes(&self) -> Vec<String> {
        let set = self.indexes.read();
        set.secondaries
            .iter()
            .filter(|s| s.index.is_none())
            .map(|s| s.permutation.name().to_string())
            .collect()
    }

    /// Check that every secondary index holds exactly the primary's tuples.
    pub fn verify(&self) -> Result<()> {
        let set = self.indexes.read();
        for secondary in &set.secondaries {
            let index = secondary.index.as_ref().ok_or_else(|| {
                StoreError::Inconsistent(format!("index {} is absent", secondary.permutation))
            })?;
            if index.len() != set.primary.len() {
                return Err(StoreError::Inconsistent(format!(
                    "index {} holds {} tuples, primary {} holds {}",
                    index.name(),
                    index.len(),
                    set.primary.name(),
                    set.primary.len()
                )));
            }
            if !index.same_tuples(&set.primary) {
                return Err(StoreError::Inconsistent(format!(
                    "index {} disagrees with primary {}",
                    index.name(),
                    set.primary.name()
                )));
            }
        }
        Ok(())
    }

    /// Make every secondary index absent. Returns how many were present.
    pub fn drop_secondaries(&self) -> usize {
        let mut set = self.indexes.write();
        let mut dropped = 0;
        for secondary in &mut set.secondaries {
            if secondary.index.take().is_some() {
                dropped += 1;
            }
        }
        debug!(
            "Dropped {dropped} secondary index(es) of {}",
            set.primary.name()
        );
        dropped
    }

    /// Rebuild every absent secondary index from the primary.
    ///
    /// Readers keep running while the indexes are built; writers wait until
    /// the new indexes are installed. Returns the number rebuilt.
    pub fn rebuild_secondaries(
        &self,
        strategy: IndexBuild,
        monitor: &ProgressMonitor,
    ) -> Result<usize> {
        let set = self.indexes.upgradable_read();
        let (slots, targets): (Vec<usize>, Vec<Permutation>) = set
            .secondaries
            .iter()
            .enumerate()
            .filter(|(_, s)| s.index.is_none())
            .map(|(i, s)| (i, s.permutation.clone()))
            .unzip();
        if targets.is_empty() {
            return Ok(0);
        }

        let names: Vec<String> = targets.iter().map(|p| p.name().to_string()).collect();
        info!(
            "Building index(es) {} from {} ({} tuples)",
            names.join(", "),
            set.primary.name(),
            set.primary.len()
        );
        let built = build_indexes(&set.primary, targets, strategy, monitor)?;

        let mut set = RwLockUpgradableReadGuard::upgrade(set);
        for (slot, index) in slots.iter().zip(built) {
            set.secondaries[*slot].index = Some(index);
        }
        Ok(slots.len())
    }

    pub fn is_dirty(&self) -> bool {
        self.indexes
            .read()
            .present()
            .any(|(_, index)| index.is_dirty())
    }

    /// Write every dirty present index (every present index when `force`).
    ///
    /// An index that fails to save stays dirty.
    pub fn sync(&self, force: bool) -> Result<()> {
        let Some(dir) = &self.location else {
            return Ok(());
        };
        let mut set = self.indexes.write();
        for index in set.present_mut() {
            if force || index.is_dirty() {
                index.save(dir)?;
            }
        }
        Ok(())
    }
}

fn parse_names(arity: usize, names: &[String]) -> Result<Vec<Permutation>> {
    let mut permutations: Vec<Permutation> = Vec::with_capacity(names.len());
    for name in names {
        let permutation = Permutation::parse(arity, name)?;
        if permutations.contains(&permutation) {
            return Err(StoreError::Config(format!(
                "index {permutation} listed twice"
            )));
        }
        permutations.push(permutation);
    }
    Ok(permutations)
}

/// Lazy cursor over one index of a [`TupleTable`].
///
/// Holds no lock between calls to `next`: each refill takes a short read lock
/// and copies out a batch of keys after the last one returned.
#[derive(Debug)]
pub struct TupleScan {
    indexes: Arc<RwLock<IndexSet>>,
    slot: IndexSlot,
    prefix: Vec<u8>,
    pattern: TuplePattern,
    filtered: bool,
    last: Option<Vec<u8>>,
    buffer: VecDeque<Tuple>,
    batch_size: usize,
    exhausted: bool,
}

impl TupleScan {
    fn refill(&mut self) -> Result<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let set = self.indexes.read();
            let index = set.get(self.slot).ok_or_else(|| {
                StoreError::Inconsistent("index dropped while a scan was reading it".to_string())
            })?;
            let keys = index.keys_after(&self.prefix, self.last.as_deref(), self.batch_size);
            self.exhausted = keys.len() < self.batch_size;
            for key in &keys {
                let tuple = index.decode(key);
                if !self.filtered || self.pattern.matches(&tuple) {
                    self.buffer.push_back(tuple);
                }
            }
            if let Some(key) = keys.into_iter().last() {
                self.last = Some(key);
            }
        }
        Ok(())
    }
}

impl Iterator for TupleScan {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.refill() {
            self.exhausted = true;
            self.buffer.clear();
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn triples() -> TupleTable {
        TupleTable::in_memory(3, &names(&["SPO", "POS", "OSP"]), 2).unwrap()
    }

    fn t(s: u64, p: u64, o: u64) -> [NodeId; 3] {
        [NodeId::new(s), NodeId::new(p), NodeId::new(o)]
    }

    fn collect(scan: TupleScan) -> Vec<Tuple> {
        scan.collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_duplicate_add_and_absent_delete() {
        let table = triples();
        assert!(table.add(&t(1, 2, 3)).unwrap());
        assert!(!table.add(&t(1, 2, 3)).unwrap());
        assert_eq!(table.len(), 1);

        assert!(!table.delete(&t(9, 9, 9)).unwrap());
        assert_eq!(table.len(), 1);
        table.verify().unwrap();
    }

    #[test]
    fn test_arity_mismatch_is_inconsistent() {
        let table = triples();
        let quad = [NodeId::new(1); 4];
        assert!(matches!(table.add(&quad), Err(StoreError::Inconsistent(_))));
        assert!(matches!(
            table.find(&TuplePattern::any(4)),
            Err(StoreError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_find_uses_covering_index_order() {
        let table = triples();
        for (s, p, o) in [(1, 10, 5), (2, 10, 4), (3, 11, 4), (4, 10, 6)] {
            table.add(&t(s, p, o)).unwrap();
        }

        // P bound: POS is chosen, so results come back ordered by object
        let pattern = TuplePattern::new(vec![None, Some(NodeId::new(10)), None]);
        let found = collect(table.find(&pattern).unwrap());
        let objects: Vec<u64> = found.iter().map(|t| t[2].as_u64()).collect();
        assert_eq!(objects, vec![4, 5, 6]);

        // S and O bound: OSP covers both
        let pattern = TuplePattern::new(vec![Some(NodeId::new(3)), None, Some(NodeId::new(4))]);
        assert_eq!(
            collect(table.find(&pattern).unwrap()),
            vec![Tuple::from(t(3, 11, 4))]
        );
    }

    #[test]
    fn test_scan_refills_across_batches() {
        let table = triples();
        for o in 0..7 {
            table.add(&t(1, 1, o)).unwrap();
        }
        table.add(&t(2, 1, 0)).unwrap();
        let pattern = TuplePattern::new(vec![Some(NodeId::new(1)), None, None]);
        assert_eq!(collect(table.find(&pattern).unwrap()).len(), 7);
        assert_eq!(collect(table.find(&TuplePattern::any(3)).unwrap()).len(), 8);
    }

    #[test]
    fn test_post_filter_without_covering_index() {
        let table = TupleTable::in_memory(3, &names(&["SPO"]), 16).unwrap();
        table.add(&t(1, 2, 3)).unwrap();
        table.add(&t(4, 2, 5)).unwrap();
        let pattern = TuplePattern::new(vec![None, None, Some(NodeId::new(5))]);
        assert_eq!(
            collect(table.find(&pattern).unwrap()),
            vec![Tuple::from(t(4, 2, 5))]
        );
    }

    #[test]
    fn test_drop_and_rebuild_secondaries() {
        let table = triples();
        table.add(&t(1, 2, 3)).unwrap();
        assert_eq!(table.drop_secondaries(), 2);
        table.add(&t(4, 5, 6)).unwrap();
        assert!(matches!(table.verify(), Err(StoreError::Inconsistent(_))));
        assert_eq!(table.absent_indexes(), names(&["POS", "OSP"]));

        let monitor = ProgressMonitor::new("rebuild", 0, 0);
        assert_eq!(
            table
                .rebuild_secondaries(IndexBuild::Parallel, &monitor)
                .unwrap(),
            2
        );
        table.verify().unwrap();
        assert_eq!(
            table
                .rebuild_secondaries(IndexBuild::Parallel, &monitor)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_scan_reports_dropped_index() {
        let table = triples();
        for o in 0..5 {
            table.add(&t(1, 7, o)).unwrap();
        }
        let pattern = TuplePattern::new(vec![None, Some(NodeId::new(7)), None]);
        let mut scan = table.find(&pattern).unwrap();
        assert!(scan.next().unwrap().is_ok());
        assert!(scan.next().unwrap().is_ok());
        table.drop_secondaries();
        assert!(matches!(
            scan.next(),
            Some(Err(StoreError::Inconsistent(_)))
        ));
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_find_preferring() {
        let table = triples();
        table.add(&t(1, 2, 3)).unwrap();
        let pattern = TuplePattern::any(3);
        assert!(table
            .find_preferring(&pattern, |p| p.name() == "PSO")
            .unwrap()
            .is_none());
        let scan = table
            .find_preferring(&pattern, |p| p.first_column() == 2)
            .unwrap()
            .unwrap();
        assert_eq!(collect(scan).len(), 1);
    }

    #[test]
    fn test_sync_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let table = TupleTable::open(dir.path(), 3, &names(&["SPO", "POS"]), 8).unwrap();
            table.add(&t(1, 2, 3)).unwrap();
            assert!(table.is_dirty());
            table.sync(false).unwrap();
            assert!(!table.is_dirty());
        }
        let table = TupleTable::open(dir.path(), 3, &names(&["SPO", "POS"]), 8).unwrap();
        assert!(table.contains(&t(1, 2, 3)).unwrap());
        table.verify().unwrap();

        std::fs::remove_file(dir.path().join("POS.idx")).unwrap();
        let table = TupleTable::open(dir.path(), 3, &names(&["SPO", "POS"]), 8).unwrap();
        assert!(matches!(table.verify(), Err(StoreError::Inconsistent(_))));
    }

    #[test]
    fn test_duplicate_index_names_rejected() {
        assert!(matches!(
            TupleTable::in_memory(3, &names(&["SPO", "SPO"]), 8),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            TupleTable::in_memory(3, &[], 8),
            Err(StoreError::Config(_))
        ));
    }
}
