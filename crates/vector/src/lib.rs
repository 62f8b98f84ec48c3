//! Vector index for mosaicdb
//!
//! Approximate nearest-neighbor search over a float-vector field using an
//! HNSW graph:
//! - [`VectorIndexManager`]: one named index over the entity table of the
//!   same name, staged writes, k-NN search, rebuild, save and load
//! - [`VectorConfig`] / [`Metric`]: dimension, L2 or cosine, HNSW knobs
//!
//! Search is deterministic for a given insert history. Removed vectors are
//! tombstoned; they keep routing searches but never appear in results.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod distance;
mod heap;
mod hnsw;
pub mod index;
pub mod manager;
pub mod persist;

pub use config::{Metric, VectorConfig, DEFAULT_VECTOR_FIELD};
pub use heap::VectorId;
pub use index::VectorOp;
pub use manager::{VectorIndexManager, VectorPatch, VectorStats};
pub use persist::index_path;
