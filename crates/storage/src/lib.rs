//! Storage layer for mosaicdb
//!
//! This crate implements the ordered, versioned key-value engine everything
//! else is built on:
//! - LsmEngine: WAL-backed memtable, immutable SSTables, background flush
//! - Snapshot: sequence-pinned read views with snapshot isolation
//! - WriteBatch / Overlay: staged writes with read-your-writes
//! - KvRead / KvWrite: the seams index managers are written against
//!
//! Every commit carries a global sequence number. A key keeps multiple
//! versions until compaction proves no live snapshot can see them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod memtable;
pub mod merge;
pub mod snapshot;
pub mod sstable;
pub mod traits;

pub use batch::{Overlay, WriteBatch};
pub use config::StorageConfig;
pub use engine::{EngineStats, LsmEngine};
pub use snapshot::Snapshot;
pub use traits::{KeyRange, KvRead, KvStage, KvWrite, ScanFn};
