//! Index descriptors
//!
//! A descriptor names a `(table, column)` pair and the index kind built
//! over it. Descriptors are stored as JSON under
//! `idxmeta:<table>:<column>:<kind>` so they survive restarts. A column may
//! carry several indexes of different kinds, at most one per kind.

use crate::fulltext::FulltextConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator of composite column names (`city+zip`)
pub const COMPOSITE_SEP: char = '+';

/// Index kind without its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexType {
    /// Exact match on the canonical text of one or more columns
    Equality,
    /// Ordered numeric or string values
    Range,
    /// Only non-null, non-empty values are indexed
    Sparse,
    /// Geohash of `<column>_lat` / `<column>_lon`
    Geo,
    /// Expiry time derived from the write time
    Ttl,
    /// Inverted token index with BM25 statistics
    Fulltext,
}

impl IndexType {
    /// Stable lowercase name used in keys and stats
    pub fn name(&self) -> &'static str {
        match self {
            IndexType::Equality => "equality",
            IndexType::Range => "range",
            IndexType::Sparse => "sparse",
            IndexType::Geo => "geo",
            IndexType::Ttl => "ttl",
            IndexType::Fulltext => "fulltext",
        }
    }

    /// Every type, in a fixed order
    pub fn all() -> [IndexType; 6] {
        [
            IndexType::Equality,
            IndexType::Range,
            IndexType::Sparse,
            IndexType::Geo,
            IndexType::Ttl,
            IndexType::Fulltext,
        ]
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index kind with its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexKind {
    /// Equality index; `column` may be composite (`a+b`)
    Equality {
        /// Reject a second entity with the same value
        #[serde(default)]
        unique: bool,
    },
    /// Range index
    Range,
    /// Sparse index
    Sparse {
        /// Reject a second entity with the same value
        #[serde(default)]
        unique: bool,
    },
    /// Geo index
    Geo,
    /// TTL index
    Ttl {
        /// Lifetime after each write
        ttl_seconds: i64,
    },
    /// Fulltext index
    Fulltext(FulltextConfig),
}

impl IndexKind {
    /// Kind without configuration
    pub fn index_type(&self) -> IndexType {
        match self {
            IndexKind::Equality { .. } => IndexType::Equality,
            IndexKind::Range => IndexType::Range,
            IndexKind::Sparse { .. } => IndexType::Sparse,
            IndexKind::Geo => IndexType::Geo,
            IndexKind::Ttl { .. } => IndexType::Ttl,
            IndexKind::Fulltext(_) => IndexType::Fulltext,
        }
    }

    /// Whether the index enforces uniqueness
    pub fn is_unique(&self) -> bool {
        matches!(
            self,
            IndexKind::Equality { unique: true } | IndexKind::Sparse { unique: true }
        )
    }

    /// Plain equality index
    pub fn equality() -> Self {
        IndexKind::Equality { unique: false }
    }

    /// Unique equality index
    pub fn unique() -> Self {
        IndexKind::Equality { unique: true }
    }
}

/// A persisted index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Indexed table
    pub table: String,
    /// Indexed column, or `a+b` for composite equality
    pub column: String,
    /// Kind and configuration
    pub kind: IndexKind,
}

impl IndexDescriptor {
    /// New descriptor
    pub fn new(table: impl Into<String>, column: impl Into<String>, kind: IndexKind) -> Self {
        IndexDescriptor {
            table: table.into(),
            column: column.into(),
            kind,
        }
    }

    /// Kind without configuration
    pub fn index_type(&self) -> IndexType {
        self.kind.index_type()
    }

    /// Component columns (one for non-composite indexes)
    pub fn columns(&self) -> Vec<&str> {
        self.column.split(COMPOSITE_SEP).collect()
    }

    /// Whether this is a multi-column equality index
    pub fn is_composite(&self) -> bool {
        self.column.contains(COMPOSITE_SEP)
    }
}

/// Composite column name for `columns`
pub fn composite_column(columns: &[&str]) -> String {
    columns.join(&COMPOSITE_SEP.to_string())
}
