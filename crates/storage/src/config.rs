//! Storage engine tuning knobs

use mosaic_durability::DurabilityMode;
use serde::{Deserialize, Serialize};

/// Configuration for an [`LsmEngine`](crate::LsmEngine)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Freeze the memtable once it holds this many bytes
    #[serde(default = "default_memtable_bytes")]
    pub memtable_size_bytes: usize,
    /// Merge SSTables once this many exist
    #[serde(default = "default_compaction_trigger")]
    pub compaction_trigger: usize,
    /// One sparse index entry per this many SSTable entries
    #[serde(default = "default_index_interval")]
    pub sparse_index_interval: usize,
    /// Flush and compact on a background thread; when false the committing
    /// thread does it inline
    #[serde(default = "default_true")]
    pub background_compaction: bool,
    /// WAL fsync policy
    #[serde(skip)]
    pub durability: DurabilityMode,
}

fn default_memtable_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_compaction_trigger() -> usize {
    4
}

fn default_index_interval() -> usize {
    16
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            memtable_size_bytes: default_memtable_bytes(),
            compaction_trigger: default_compaction_trigger(),
            sparse_index_interval: default_index_interval(),
            background_compaction: true,
            durability: DurabilityMode::default(),
        }
    }
}

impl StorageConfig {
    /// Small synchronous configuration for tests: strict fsync, inline
    /// flushes, tiny memtable so SSTables actually get written
    pub fn for_testing() -> Self {
        StorageConfig {
            memtable_size_bytes: 16 * 1024,
            compaction_trigger: 3,
            sparse_index_interval: 4,
            background_compaction: false,
            durability: DurabilityMode::Strict,
        }
    }
}
