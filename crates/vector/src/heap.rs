//! Contiguous embedding storage
//!
//! Vectors live back to back in one `Vec<f32>`; a `BTreeMap` maps each
//! `VectorId` to its offset so iteration order is deterministic. Ids are
//! never reused; a tombstoned vector keeps its slot until the index is
//! rebuilt.

use mosaic_core::{Error, Result};
use std::collections::BTreeMap;

/// Internal id of one stored vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VectorId(pub u64);

/// Embeddings of one index
#[derive(Debug, Clone)]
pub(crate) struct VectorHeap {
    dimension: usize,
    data: Vec<f32>,
    offsets: BTreeMap<VectorId, usize>,
}

impl VectorHeap {
    pub(crate) fn new(dimension: usize) -> Self {
        VectorHeap {
            dimension,
            data: Vec::new(),
            offsets: BTreeMap::new(),
        }
    }

    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or overwrite the vector of `id`
    pub(crate) fn upsert(&mut self, id: VectorId, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::InvalidArgument(format!(
                "vector has {} components, index expects {}",
                embedding.len(),
                self.dimension
            )));
        }
        let offset = match self.offsets.get(&id) {
            Some(&offset) => offset,
            None => {
                let offset = self.data.len();
                self.data.resize(offset + self.dimension, 0.0);
                self.offsets.insert(id, offset);
                offset
            }
        };
        self.data[offset..offset + self.dimension].copy_from_slice(embedding);
        Ok(())
    }

    pub(crate) fn get(&self, id: VectorId) -> Option<&[f32]> {
        let offset = *self.offsets.get(&id)?;
        self.data.get(offset..offset + self.dimension)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = VectorId> + '_ {
        self.offsets.keys().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Approximate bytes held by vector data
    pub(crate) fn memory_usage(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>() + self.offsets.len() * 32
    }
}
