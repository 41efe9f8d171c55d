//! Open-addressing hash index from term hash to node id
//!
//! Slots keep the full 64-bit hash so that growing the table never needs the
//! term bytes. Equal hashes are told apart by the caller's comparison against
//! the value log.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::NodeId;
use crate::error::Result;

const EMPTY: u64 = u64::MAX;
const MIN_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Slot {
    hash: u64,
    id: u64,
}

impl Slot {
    const VACANT: Slot = Slot { hash: 0, id: EMPTY };

    fn is_vacant(self) -> bool {
        self.id == EMPTY
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HashIndex {
    slots: Vec<Slot>,
    len: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Probe for `hash`, accepting the first candidate for which `same` holds.
    pub fn find(&self, hash: u64, mut same: impl FnMut(NodeId) -> bool) -> Option<NodeId> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut position = (hash as usize) & mask;
        loop {
            let slot = self.slots[position];
            if slot.is_vacant() {
                return None;
            }
            if slot.hash == hash && same(NodeId::new(slot.id)) {
                return Some(NodeId::new(slot.id));
            }
            position = (position + 1) & mask;
        }
    }

    /// Add an entry. The caller has already checked that the term is absent.
    pub fn insert(&mut self, hash: u64, id: NodeId) {
        if (self.len + 1) * 10 > self.slots.len() * 7 {
            self.grow();
        }
        Self::place(
            &mut self.slots,
            Slot {
                hash,
                id: id.as_u64(),
            },
        );
        self.len += 1;
    }

    fn place(slots: &mut [Slot], slot: Slot) {
        let mask = slots.len() - 1;
        let mut position = (slot.hash as usize) & mask;
        while !slots[position].is_vacant() {
            position = (position + 1) & mask;
        }
        slots[position] = slot;
    }

    fn grow(&mut self) {
        let capacity = (self.slots.len() * 2).max(MIN_CAPACITY);
        let mut slots = vec![Slot::VACANT; capacity];
        for slot in self.slots.iter().copied().filter(|s| !s.is_vacant()) {
            Self::place(&mut slots, slot);
        }
        self.slots = slots;
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let index: HashIndex = bincode::deserialize_from(reader)?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_insert_and_find() {
        let mut index = HashIndex::new();
        for i in 0..1000u64 {
            index.insert(i.wrapping_mul(0x9E37_79B9_7F4A_7C15), NodeId::new(i * 10));
        }
        assert_eq!(index.len(), 1000);
        assert!(index.len() * 10 <= index.capacity() * 7);

        for i in 0..1000u64 {
            let found = index.find(i.wrapping_mul(0x9E37_79B9_7F4A_7C15), |_| true);
            assert_eq!(found, Some(NodeId::new(i * 10)));
        }
        assert_eq!(index.find(12345, |_| true), None);
    }

    #[test]
    fn test_collisions_resolved_by_comparison() {
        let mut index = HashIndex::new();
        let values: HashMap<u64, &str> = [(1, "alpha"), (2, "beta"), (3, "gamma")].into();

        // Same hash for every entry: the comparison decides.
        for id in [1u64, 2, 3] {
            index.insert(7, NodeId::new(id));
        }

        for wanted in ["alpha", "beta", "gamma"] {
            let found = index.find(7, |id| values[&id.as_u64()] == wanted);
            assert_eq!(found.map(|id| values[&id.as_u64()]), Some(wanted));
        }
        assert_eq!(index.find(7, |id| values[&id.as_u64()] == "delta"), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node2id.idn");

        let mut index = HashIndex::new();
        index.insert(42, NodeId::new(0));
        index.insert(43, NodeId::new(17));
        index.save_to_file(&path).unwrap();

        let loaded = HashIndex::load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.find(43, |_| true), Some(NodeId::new(17)));
    }
}
