use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Store configuration file written at the root of an on-disk location
pub const CONFIG_FILE: &str = "store.cfg";
/// Statistics artifact file
pub const STATS_FILE: &str = "stats.opt";
/// Subdirectory holding the default-graph triple indexes
pub const TRIPLES_DIR: &str = "triples";
/// Subdirectory holding the named-graph quad indexes
pub const QUADS_DIR: &str = "quads";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the store; `None` keeps everything in memory
    pub location: Option<PathBuf>,
    /// Triple index permutations, the first one primary
    pub triple_indexes: Vec<String>,
    /// Quad index permutations, the first one primary
    pub quad_indexes: Vec<String>,
    /// Reorder strategy name: `none`, `fixed` or `weighted`
    pub reorder: Option<String>,
    /// Tuples fetched per refill of a lazy scan
    pub scan_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: None,
            triple_indexes: vec!["SPO".to_string(), "POS".to_string(), "OSP".to_string()],
            quad_indexes: ["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reorder: None,
            scan_batch_size: 1024,
        }
    }
}

impl StoreConfig {
    pub fn at(location: impl Into<PathBuf>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::default()
        }
    }

    pub fn with_reorder(mut self, reorder: impl Into<String>) -> Self {
        self.reorder = Some(reorder.into());
        self
    }

    /// Read `store.cfg` under `dir`, if present.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let config: StoreConfig = serde_json::from_slice(&std::fs::read(&path)?)?;
        Ok(Some(config))
    }

    /// Write `store.cfg` under `dir`. The location itself is not recorded.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let stored = StoreConfig {
            location: None,
            ..self.clone()
        };
        std::fs::write(dir.join(CONFIG_FILE), serde_json::to_vec_pretty(&stored)?)?;
        debug!("Wrote {}", dir.join(CONFIG_FILE).display());
        Ok(())
    }

    /// Take the index layout from a previously written configuration.
    pub fn merge_stored(mut self, stored: StoreConfig) -> Self {
        self.triple_indexes = stored.triple_indexes;
        self.quad_indexes = stored.quad_indexes;
        if self.reorder.is_none() {
            self.reorder = stored.reorder;
        }
        self
    }
}
