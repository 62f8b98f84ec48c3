//! Database configuration via `mosaic.toml`
//!
//! On first open a commented default `mosaic.toml` is written into the
//! database directory. To change settings, edit the file and reopen.

use mosaic_core::{Error, Result};
use mosaic_durability::DurabilityMode;
use mosaic_graph::DEFAULT_EDGE_TABLE;
use mosaic_index::FulltextConfig;
use mosaic_storage::StorageConfig;
use mosaic_vector::{Metric, VectorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the database directory
pub const CONFIG_FILE_NAME: &str = "mosaic.toml";

/// Defaults for newly created vector indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDefaults {
    /// Links per node on upper layers
    pub m: usize,
    /// Beam width while linking
    pub ef_construction: usize,
    /// Beam width while searching
    pub ef_search: usize,
}

impl Default for VectorDefaults {
    fn default() -> Self {
        let base = VectorConfig::new(1, Metric::L2);
        VectorDefaults {
            m: base.m,
            ef_construction: base.ef_construction,
            ef_search: base.ef_search,
        }
    }
}

impl VectorDefaults {
    /// Index configuration with these parameters
    pub fn config(&self, dimension: usize, metric: Metric) -> VectorConfig {
        VectorConfig::new(dimension, metric)
            .with_m(self.m)
            .with_ef_construction(self.ef_construction)
            .with_ef_search(self.ef_search)
    }
}

/// Graph settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Table holding edge entities
    pub edge_table: String,
}

impl Default for GraphSettings {
    fn default() -> Self {
        GraphSettings {
            edge_table: DEFAULT_EDGE_TABLE.to_string(),
        }
    }
}

/// Database configuration loaded from `mosaic.toml`.
///
/// ```toml
/// durability = "standard"
///
/// [storage]
/// memtable_size_bytes = 4194304
///
/// [graph]
/// edge_table = "edges"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicConfig {
    /// `"standard"` (batched fsync) or `"always"` (fsync per commit)
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Storage engine knobs
    #[serde(default)]
    pub storage: StorageConfig,
    /// Vector index defaults
    #[serde(default)]
    pub vector: VectorDefaults,
    /// Graph settings
    #[serde(default)]
    pub graph: GraphSettings,
    /// Analyzer used when a fulltext index is created without one
    #[serde(default)]
    pub fulltext: FulltextConfig,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

impl Default for MosaicConfig {
    fn default() -> Self {
        MosaicConfig {
            durability: default_durability_str(),
            storage: StorageConfig::default(),
            vector: VectorDefaults::default(),
            graph: GraphSettings::default(),
            fulltext: FulltextConfig::default(),
        }
    }
}

impl MosaicConfig {
    /// Parse the durability string.
    ///
    /// Anything other than `"standard"` or `"always"` is `InvalidArgument`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.as_str() {
            "standard" => Ok(DurabilityMode::default()),
            "always" => Ok(DurabilityMode::Strict),
            other => Err(Error::InvalidArgument(format!(
                "Invalid durability mode '{}' in {}. Expected \"standard\" or \"always\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Storage configuration with the durability mode applied
    pub fn storage_config(&self) -> Result<StorageConfig> {
        let mut storage = self.storage.clone();
        storage.durability = self.durability_mode()?;
        Ok(storage)
    }

    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# mosaicdb configuration
#
# Durability mode: "standard" (default) or "always"
#   "standard" = fsync every 100ms or 1000 commits, a power loss may drop the last batch
#   "always"   = fsync every commit
durability = "standard"

[storage]
# Freeze the memtable and flush it to an SSTable at this size
memtable_size_bytes = 4194304
# Merge SSTables once this many exist
compaction_trigger = 4
# One sparse index entry per this many SSTable entries
sparse_index_interval = 16
# Flush and compact on a background thread
background_compaction = true

[vector]
# HNSW defaults for new vector indexes
m = 16
ef_construction = 200
ef_search = 64

[graph]
# Table holding edge entities
edge_table = "edges"

[fulltext]
# Analyzer used when a fulltext index is created without one
stemming_enabled = false
language = "en"
stopwords_enabled = false
stopwords = []
normalize_umlauts = false
"#
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MosaicConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidArgument(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.durability_mode()?;
        if config.graph.edge_table.is_empty() {
            return Err(Error::InvalidArgument("graph.edge_table must not be empty".into()));
        }
        Ok(config)
    }

    /// Write the default config file unless one exists
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
