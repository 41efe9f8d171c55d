//! Ordered index over tuples of node ids under one permutation
//!
//! Keys are fixed-width big-endian encodings of the tuple taken in the
//! permutation's column order, so the ordered set iterates tuples sorted by
//! that permutation and a bound leading prefix becomes a byte range.
//! On disk an index is the plain concatenation of its keys (`<NAME>.idx`).

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::core::encoding::{decode_key, encode_key, encode_prefix, KEY_COLUMN_WIDTH};
use crate::core::{NodeId, Tuple, TuplePattern};
use crate::error::{Result, StoreError};
use crate::storage::indexing::permutation::Permutation;

pub const INDEX_FILE_EXTENSION: &str = "idx";

#[derive(Debug, Clone)]
pub struct TupleIndex {
    permutation: Permutation,
    keys: BTreeSet<Vec<u8>>,
    dirty: bool,
}

impl TupleIndex {
    pub fn new(permutation: Permutation) -> Self {
        Self {
            permutation,
            keys: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    pub fn name(&self) -> &str {
        self.permutation.name()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the next sync to rewrite this index's file.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn key_of(&self, tuple: &[NodeId]) -> Vec<u8> {
        encode_key(tuple, self.permutation.order())
    }

    /// Decode one of this index's keys into a canonical-order tuple
    pub fn decode(&self, key: &[u8]) -> Tuple {
        decode_key(key, self.permutation.order())
    }

    /// Insert a canonical-order tuple; false if it was already present.
    pub fn insert(&mut self, tuple: &[NodeId]) -> bool {
        let added = self.keys.insert(self.key_of(tuple));
        self.dirty |= added;
        added
    }

    /// Remove a canonical-order tuple; deleting an absent tuple is a no-op.
    pub fn delete(&mut self, tuple: &[NodeId]) -> bool {
        let removed = self.keys.remove(&self.key_of(tuple));
        self.dirty |= removed;
        removed
    }

    pub fn contains(&self, tuple: &[NodeId]) -> bool {
        self.keys.contains(&self.key_of(tuple))
    }

    pub fn clear(&mut self) {
        if !self.keys.is_empty() {
            self.keys.clear();
            self.dirty = true;
        }
    }

    /// Tuples matching `pattern`, in this index's sort order.
    ///
    /// The leading bound columns select a key range; any other bound column
    /// is checked per tuple.
    pub fn scan<'a>(&'a self, pattern: &'a TuplePattern) -> impl Iterator<Item = Tuple> + 'a {
        let prefix = encode_prefix(&self.permutation.prefix_ids(pattern));
        let filtered = self.permutation.prefix_len(pattern) < pattern.bound_count();
        self.keys
            .range::<Vec<u8>, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
            .take_while(move |key| key.starts_with(&prefix))
            .map(|key| self.decode(key))
            .filter(move |tuple| !filtered || pattern.matches(tuple))
    }

    /// Every tuple in sort order
    pub fn iter(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.keys.iter().map(|key| self.decode(key))
    }

    /// Up to `limit` keys starting with `prefix`, strictly after `after` when given.
    pub fn keys_after(&self, prefix: &[u8], after: Option<&[u8]>, limit: usize) -> Vec<Vec<u8>> {
        let start = match after {
            Some(key) => Bound::Excluded(key.to_vec()),
            None => Bound::Included(prefix.to_vec()),
        };
        self.keys
            .range::<Vec<u8>, _>((start, Bound::Unbounded))
            .take_while(|key| key.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Same membership as `other`, whatever the two permutations
    pub fn same_tuples(&self, other: &TupleIndex) -> bool {
        self.len() == other.len() && other.iter().all(|tuple| self.contains(&tuple))
    }

    pub fn file_path(dir: &Path, permutation: &Permutation) -> PathBuf {
        dir.join(format!("{}.{INDEX_FILE_EXTENSION}", permutation.name()))
    }

    /// Write every key to `<dir>/<NAME>.idx` via a temporary file.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        let path = Self::file_path(dir, &self.permutation);
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for key in &self.keys {
                writer.write_all(key)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        self.dirty = false;
        Ok(())
    }

    /// Load `<dir>/<NAME>.idx`; `None` if the file does not exist.
    pub fn load(dir: &Path, permutation: Permutation) -> Result<Option<Self>> {
        let path = Self::file_path(dir, &permutation);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let width = permutation.arity() * KEY_COLUMN_WIDTH;
        if bytes.len() % width != 0 {
            return Err(StoreError::Codec(format!(
                "{}: {} bytes is not a whole number of {width}-byte keys",
                path.display(),
                bytes.len()
            )));
        }
        let keys = bytes.chunks_exact(width).map(<[u8]>::to_vec).collect();
        Ok(Some(Self {
            permutation,
            keys,
            dirty: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> Vec<NodeId> {
        values.iter().copied().map(NodeId::new).collect()
    }

    fn index(name: &str) -> TupleIndex {
        TupleIndex::new(Permutation::parse(3, name).unwrap())
    }

    #[test]
    fn test_insert_delete() {
        let mut spo = index("SPO");
        assert!(spo.insert(&ids(&[1, 2, 3])));
        assert!(!spo.insert(&ids(&[1, 2, 3])));
        assert!(spo.contains(&ids(&[1, 2, 3])));
        assert_eq!(spo.len(), 1);

        assert!(!spo.delete(&ids(&[3, 2, 1])));
        assert!(spo.delete(&ids(&[1, 2, 3])));
        assert!(spo.is_empty());
    }

    #[test]
    fn test_empty_pattern_scans_in_sort_order() {
        let mut pos = index("POS");
        for t in [[1, 9, 5], [2, 1, 7], [3, 9, 4], [4, 1, 7]] {
            pos.insert(&ids(&t));
        }
        let all: Vec<Tuple> = pos.scan(&TuplePattern::any(3)).collect();
        let expected: Vec<Tuple> = [[2, 1, 7], [4, 1, 7], [3, 9, 4], [1, 9, 5]]
            .iter()
            .map(|t| Tuple::new(ids(t)))
            .collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_prefix_scan_and_post_filter() {
        let mut spo = index("SPO");
        for t in [[1, 2, 3], [1, 2, 4], [1, 5, 3], [2, 2, 3]] {
            spo.insert(&ids(&t));
        }

        let pattern = TuplePattern::new(vec![Some(NodeId::new(1)), Some(NodeId::new(2)), None]);
        assert_eq!(spo.scan(&pattern).count(), 2);

        // Object bound but not part of the SPO prefix after S
        let pattern = TuplePattern::new(vec![Some(NodeId::new(1)), None, Some(NodeId::new(3))]);
        let found: Vec<Tuple> = spo.scan(&pattern).collect();
        assert_eq!(
            found,
            vec![Tuple::new(ids(&[1, 2, 3])), Tuple::new(ids(&[1, 5, 3]))]
        );
    }

    #[test]
    fn test_keys_after_pages_through_prefix() {
        let mut spo = index("SPO");
        for o in 0..10 {
            spo.insert(&ids(&[1, 1, o]));
        }
        spo.insert(&ids(&[2, 0, 0]));

        let prefix = encode_prefix(&ids(&[1]));
        let first = spo.keys_after(&prefix, None, 4);
        assert_eq!(first.len(), 4);
        let second = spo.keys_after(&prefix, first.last().map(Vec::as_slice), 100);
        assert_eq!(second.len(), 6);
        assert!(second.iter().all(|key| key.starts_with(&prefix)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut osp = index("OSP");
        osp.insert(&ids(&[1, 2, 3]));
        osp.insert(&ids(&[4, 5, 6]));
        assert!(osp.is_dirty());
        osp.save(dir.path()).unwrap();
        assert!(!osp.is_dirty());

        let loaded = TupleIndex::load(dir.path(), Permutation::parse(3, "OSP").unwrap())
            .unwrap()
            .unwrap();
        assert!(loaded.same_tuples(&osp));
        assert!(
            TupleIndex::load(dir.path(), Permutation::parse(3, "POS").unwrap())
                .unwrap()
                .is_none()
        );
    }
}
