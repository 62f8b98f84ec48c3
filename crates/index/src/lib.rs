//! Secondary indexes for mosaicdb
//!
//! Indexes are extra key ranges inside the same LSM engine as the entities
//! they describe. [`SecondaryIndexManager`] keeps them in step with entity
//! writes and answers queries against them:
//!
//! - equality (single column, composite `a+b`, optionally unique)
//! - range over an order-preserving value encoding
//! - sparse, skipping null and empty values
//! - geo, keyed by geohash of `<column>_lat` / `<column>_lon`
//! - TTL, keyed by expiry time for cleanup scans
//! - fulltext with BM25 ranking
//!
//! Write paths return [`Status`](mosaic_core::Status) and can stage into any
//! [`KvStage`](mosaic_storage::KvStage), which is how the transaction
//! manager folds index maintenance into its own transaction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conjunctive;
pub mod descriptor;
pub mod fulltext;
pub mod geo;
pub mod keys;
pub mod maintenance;
pub mod manager;
pub mod query;
pub mod sortable;
pub mod ttl;

pub use conjunctive::Predicate;
pub use descriptor::{composite_column, IndexDescriptor, IndexKind, IndexType};
pub use fulltext::{FulltextConfig, Language};
pub use maintenance::IndexStats;
pub use manager::{system_clock, Clock, RebuildMetrics, SecondaryIndexManager};
pub use query::RangeQuery;
