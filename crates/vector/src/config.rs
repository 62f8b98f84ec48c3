//! Vector index configuration

use mosaic_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity field holding the vector unless configured otherwise
pub const DEFAULT_VECTOR_FIELD: &str = "embedding";

/// Distance function; smaller is closer for both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance
    L2,
    /// `1 - cosine similarity`; vectors are normalized on insert
    Cosine,
}

impl Metric {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Metric::L2),
            1 => Ok(Metric::Cosine),
            other => Err(Error::Corrupt(format!("unknown vector metric tag {}", other))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        })
    }
}

/// Shape and HNSW parameters of one vector index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Number of components per vector
    pub dimension: usize,
    /// Distance function
    pub metric: Metric,
    /// Links per node on upper layers; layer 0 allows twice as many
    pub m: usize,
    /// Beam width while linking new nodes
    pub ef_construction: usize,
    /// Beam width while searching; larger finds more true neighbors, slower
    pub ef_search: usize,
    /// Entity field holding the vector
    pub field: String,
}

impl VectorConfig {
    /// Default HNSW parameters, reading the `embedding` field
    pub fn new(dimension: usize, metric: Metric) -> Self {
        VectorConfig {
            dimension,
            metric,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            field: DEFAULT_VECTOR_FIELD.to_string(),
        }
    }

    /// Set `m`
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    /// Set `ef_construction`
    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Set `ef_search`
    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Read vectors from `field`
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Reject parameters HNSW cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidArgument("vector dimension must be positive".into()));
        }
        if self.m < 2 {
            return Err(Error::InvalidArgument("m must be at least 2".into()));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::InvalidArgument("ef parameters must be positive".into()));
        }
        if self.field.is_empty() {
            return Err(Error::InvalidArgument("vector field name must not be empty".into()));
        }
        Ok(())
    }

    /// Level multiplier `1 / ln(m)`
    pub(crate) fn ml(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}
