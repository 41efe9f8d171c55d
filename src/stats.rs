//! Predicate-frequency statistics used by the weighted reorder
//!
//! The artifact is a snapshot taken at load time (or on demand with
//! [`collect`]) and is not kept in step with later updates. On disk it is a
//! small S-expression file:
//!
//! ```text
//! (stats
//!   (meta
//!     (timestamp 1792224000)
//!     (count 3))
//!   (<http://example/p> 2)
//!   (<http://example/q> 1)
//! )
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use oxigraph::model::Term;
use parking_lot::Mutex;
use regex::Regex;

use crate::core::NodeId;
use crate::dataset::Dataset;
use crate::error::{Result, StoreError};
use crate::storage::node_table::NodeTable;
use crate::storage::node_tuple_table::TableObserver;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    total: u64,
    predicates: BTreeMap<String, u64>,
}

impl Statistics {
    pub fn new(total: u64, predicates: BTreeMap<String, u64>) -> Self {
        Self { total, predicates }
    }

    /// Number of tuples counted
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Occurrences of `predicate`; 0 for predicates never seen or that are not IRIs
    pub fn count(&self, predicate: &Term) -> u64 {
        match predicate {
            Term::NamedNode(node) => self.count_iri(node.as_str()),
            _ => 0,
        }
    }

    pub fn count_iri(&self, iri: &str) -> u64 {
        self.predicates.get(iri).copied().unwrap_or(0)
    }

    /// Number of distinct predicates
    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&str, u64)> {
        self.predicates
            .iter()
            .map(|(iri, count)| (iri.as_str(), *count))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(writer, "(stats")?;
        writeln!(writer, "  (meta")?;
        writeln!(writer, "    (timestamp {timestamp})")?;
        writeln!(writer, "    (count {}))", self.total)?;
        for (iri, count) in &self.predicates {
            writeln!(writer, "  (<{iri}> {count})")?;
        }
        writeln!(writer, ")")?;
        Ok(())
    }

    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        StatsReader::new()?.read(reader)
    }

    /// Write to `path` via a temporary file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut writer)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

struct StatsReader {
    open_regex: Regex,
    meta_regex: Regex,
    timestamp_regex: Regex,
    count_regex: Regex,
    entry_regex: Regex,
    close_regex: Regex,
}

impl StatsReader {
    fn new() -> Result<Self> {
        Ok(Self {
            open_regex: Regex::new(r"^\(stats$")?,
            meta_regex: Regex::new(r"^\(meta$")?,
            timestamp_regex: Regex::new(r"^\(timestamp\s+\S+\)$")?,
            count_regex: Regex::new(r"^\(count\s+(\d+)\)\)?$")?,
            entry_regex: Regex::new(r"^\((\S+)\s+(\d+)\)$")?,
            close_regex: Regex::new(r"^\)+$")?,
        })
    }

    fn read<R: BufRead>(&self, reader: R) -> Result<Statistics> {
        let mut total = None;
        let mut predicates = BTreeMap::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty()
                || self.open_regex.is_match(line)
                || self.meta_regex.is_match(line)
                || self.timestamp_regex.is_match(line)
                || self.close_regex.is_match(line)
            {
                continue;
            }
            if let Some(captures) = self.count_regex.captures(line) {
                total = Some(parse_count(&captures[1], number)?);
                continue;
            }
            let captures = self.entry_regex.captures(line).ok_or_else(|| {
                StoreError::Config(format!("stats line {}: cannot parse {line:?}", number + 1))
            })?;
            let key = &captures[1];
            let iri = key
                .strip_prefix('<')
                .and_then(|k| k.strip_suffix('>'))
                .ok_or_else(|| {
                    StoreError::Config(format!("stats line {}: {key} is not an IRI", number + 1))
                })?;
            predicates.insert(iri.to_string(), parse_count(&captures[2], number)?);
        }

        let total = total
            .ok_or_else(|| StoreError::Config("stats file has no (count N) entry".to_string()))?;
        Ok(Statistics { total, predicates })
    }
}

fn parse_count(digits: &str, line: usize) -> Result<u64> {
    digits
        .parse()
        .map_err(|e| StoreError::Config(format!("stats line {}: {e}", line + 1)))
}

/// Counts predicates of added tuples.
///
/// Installed as an observer during a bulk load; ids are only resolved to
/// terms once, in [`finish`](Self::finish).
#[derive(Debug)]
pub struct StatsCollector {
    predicate_column: usize,
    total: AtomicU64,
    counts: Mutex<HashMap<NodeId, u64>>,
}

impl StatsCollector {
    /// Collector for tuples of `arity` columns (predicate is second to last).
    pub fn new(arity: usize) -> Self {
        Self {
            predicate_column: arity.saturating_sub(2),
            total: AtomicU64::new(0),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Merge the counts of several collectors into one artifact.
    pub fn finish_all(collectors: &[&StatsCollector], nodes: &NodeTable) -> Result<Statistics> {
        let mut predicates = BTreeMap::new();
        let mut total = 0;
        for collector in collectors {
            total += collector.total();
            for (&id, &count) in collector.counts.lock().iter() {
                if let Term::NamedNode(node) = nodes.resolve(id)? {
                    *predicates.entry(node.into_string()).or_insert(0) += count;
                }
            }
        }
        Ok(Statistics { total, predicates })
    }

    pub fn finish(&self, nodes: &NodeTable) -> Result<Statistics> {
        Self::finish_all(&[self], nodes)
    }
}

impl TableObserver for StatsCollector {
    fn tuple_added(&self, tuple: &[NodeId]) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(&predicate) = tuple.get(self.predicate_column) {
            *self.counts.lock().entry(predicate).or_insert(0) += 1;
        }
    }
}

/// Compute statistics over every triple and quad currently in `dataset`.
pub fn collect(dataset: &Dataset) -> Result<Statistics> {
    let mut total = 0;
    let mut predicates = BTreeMap::new();
    for quad in dataset.find_quads(None, None, None, None)? {
        let quad = quad?;
        total += 1;
        if let Term::NamedNode(node) = quad.predicate {
            *predicates.entry(node.into_string()).or_insert(0) += 1;
        }
    }
    Ok(Statistics { total, predicates })
}
