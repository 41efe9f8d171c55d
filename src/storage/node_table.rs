//! Node table: interns RDF terms to [`NodeId`]s and back
//!
//! Two structures back the table:
//! - a value log (`nodes.dat`) of `[u32 LE length][term bytes]` records; a
//!   term's id is the byte offset of its record,
//! - a hash index (`node2id.idn`) from the xxh3 hash of the term bytes to its id.
//!
//! Interning takes the hash index write lock, so it is exclusive with itself.
//! `resolve` takes read locks on both, in the same order as interning.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use oxigraph::model::Term;
use parking_lot::RwLock;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::core::encoding::{decode_term, encode_term};
use crate::core::NodeId;
use crate::error::{Result, StoreError};
use crate::storage::indexing::hash_index::HashIndex;

pub const NODES_FILE: &str = "nodes.dat";
pub const NODE_INDEX_FILE: &str = "node2id.idn";

const RECORD_HEADER: usize = 4;

#[derive(Debug, Default)]
struct ValueLog {
    bytes: Vec<u8>,
    flushed: usize,
    records: usize,
}

impl ValueLog {
    fn append(&mut self, value: &[u8]) -> NodeId {
        let offset = self.bytes.len() as u64;
        self.bytes
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(value);
        self.records += 1;
        NodeId::new(offset)
    }

    fn record(&self, id: NodeId) -> Option<&[u8]> {
        let start = usize::try_from(id.as_u64()).ok()?;
        let header = self.bytes.get(start..start.checked_add(RECORD_HEADER)?)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let body = start + RECORD_HEADER;
        self.bytes.get(body..body.checked_add(len)?)
    }

    /// Offsets and bodies of every record, in log order
    fn iter(&self) -> impl Iterator<Item = (NodeId, &[u8])> + '_ {
        let mut offset = 0usize;
        std::iter::from_fn(move || {
            let id = NodeId::new(offset as u64);
            let body = self.record(id)?;
            offset += RECORD_HEADER + body.len();
            Some((id, body))
        })
    }
}

/// Bidirectional Term ↔ NodeId mapping.
#[derive(Debug)]
pub struct NodeTable {
    index: RwLock<HashIndex>,
    log: RwLock<ValueLog>,
    index_dirty: AtomicBool,
    location: Option<PathBuf>,
}

impl NodeTable {
    /// A table that lives only in memory; `sync` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(HashIndex::new()),
            log: RwLock::new(ValueLog::default()),
            index_dirty: AtomicBool::new(false),
            location: None,
        }
    }

    /// Open (or create) the table files under `dir`.
    ///
    /// A hash index that does not cover every record of the value log, such as
    /// one left behind by a crash between two syncs, is rebuilt from the log.
    pub fn open(dir: &Path) -> Result<Self> {
        let nodes_path = dir.join(NODES_FILE);
        let bytes = if nodes_path.exists() {
            std::fs::read(&nodes_path)?
        } else {
            Vec::new()
        };

        let mut log = ValueLog {
            flushed: bytes.len(),
            bytes,
            records: 0,
        };
        let (records, consumed) = log.iter().fold((0usize, 0usize), |(n, end), (_, body)| {
            (n + 1, end + RECORD_HEADER + body.len())
        });
        log.records = records;
        if consumed != log.bytes.len() {
            warn!(
                "Truncating {} trailing bytes of partial record in {}",
                log.bytes.len() - consumed,
                nodes_path.display()
            );
            log.bytes.truncate(consumed);
            log.flushed = consumed;
            OpenOptions::new()
                .write(true)
                .open(&nodes_path)?
                .set_len(consumed as u64)?;
        }

        let index_path = dir.join(NODE_INDEX_FILE);
        let loaded = if index_path.exists() {
            Some(HashIndex::load_from_file(&index_path)?)
        } else {
            None
        };
        let (index, dirty) = match loaded {
            Some(index) if index.len() == log.records => (index, false),
            _ => {
                debug!(
                    "Rebuilding node hash index from {} value log records",
                    log.records
                );
                let mut index = HashIndex::new();
                for (id, body) in log.iter() {
                    index.insert(xxh3_64(body), id);
                }
                (index, true)
            }
        };

        Ok(Self {
            index: RwLock::new(index),
            log: RwLock::new(log),
            index_dirty: AtomicBool::new(dirty),
            location: Some(dir.to_path_buf()),
        })
    }

    /// Return the id of `term`, assigning a new one on first sight.
    pub fn intern(&self, term: &Term) -> Result<NodeId> {
        let bytes = encode_term(term)?;
        let hash = xxh3_64(&bytes);

        {
            let index = self.index.read();
            let log = self.log.read();
            if let Some(id) = index.find(hash, |id| log.record(id) == Some(bytes.as_slice())) {
                return Ok(id);
            }
        }

        let mut index = self.index.write();
        // Another writer may have interned the term between the two locks.
        let existing = {
            let log = self.log.read();
            index.find(hash, |id| log.record(id) == Some(bytes.as_slice()))
        };
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = self.log.write().append(&bytes);
        index.insert(hash, id);
        self.index_dirty.store(true, Ordering::Release);
        Ok(id)
    }

    /// Id of `term` if it has been interned. Never inserts.
    pub fn lookup(&self, term: &Term) -> Result<Option<NodeId>> {
        let bytes = encode_term(term)?;
        let hash = xxh3_64(&bytes);
        let index = self.index.read();
        let log = self.log.read();
        Ok(index.find(hash, |id| log.record(id) == Some(bytes.as_slice())))
    }

    /// Like [`lookup`](Self::lookup), with [`NodeId::NOT_PRESENT`] for unknown terms.
    pub fn lookup_or_sentinel(&self, term: &Term) -> Result<NodeId> {
        Ok(self.lookup(term)?.unwrap_or(NodeId::NOT_PRESENT))
    }

    /// Term for `id`; `NotFound` for sentinels and for any offset that is not
    /// the start of a record.
    pub fn resolve(&self, id: NodeId) -> Result<Term> {
        if id.is_reserved() {
            return Err(StoreError::NotFound(id));
        }
        let index = self.index.read();
        let log = self.log.read();
        let bytes = log.record(id).ok_or(StoreError::NotFound(id))?;
        // Only record starts are in the hash index under the hash of their body.
        if index
            .find(xxh3_64(bytes), |candidate| candidate == id)
            .is_none()
        {
            return Err(StoreError::NotFound(id));
        }
        decode_term(bytes)
    }

    pub fn contains(&self, term: &Term) -> Result<bool> {
        Ok(self.lookup(term)?.is_some())
    }

    /// Number of interned terms
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        let log = self.log.read();
        log.flushed < log.bytes.len() || self.index_dirty.load(Ordering::Acquire)
    }

    /// Append the unflushed tail of the value log and rewrite the hash index if it changed.
    ///
    /// On error nothing is marked clean, so the next sync retries the same work.
    pub fn sync(&self, force: bool) -> Result<()> {
        let Some(dir) = &self.location else {
            return Ok(());
        };

        // Hold the index lock so no intern lands between the log and index writes.
        let index = self.index.read();
        {
            let mut log = self.log.write();
            if log.flushed < log.bytes.len() || force {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .open(dir.join(NODES_FILE))?;
                // Drop whatever a failed earlier attempt managed to write.
                file.set_len(log.flushed as u64)?;
                file.seek(SeekFrom::Start(log.flushed as u64))?;
                file.write_all(&log.bytes[log.flushed..])?;
                file.sync_data()?;
                log.flushed = log.bytes.len();
            }
        }

        if force || self.index_dirty.load(Ordering::Acquire) {
            index.save_to_file(&dir.join(NODE_INDEX_FILE))?;
            self.index_dirty.store(false, Ordering::Release);
        }
        debug!(
            "Synced node table ({} terms) to {}",
            index.len(),
            dir.display()
        );
        Ok(())
    }
}
