//! mosaicdb - transactional multi-model storage core
//!
//! Schema-less entities, secondary indexes, a property graph and vector
//! indexes share one LSM key-value store. A transaction that touches several
//! of them becomes visible everywhere at once or not at all.
//!
//! # Quick Start
//!
//! ```ignore
//! use mosaicdb::{BaseEntity, Database, Edge, IndexKind, Metric};
//!
//! let db = Database::open("/data/mosaic")?;
//! db.create_index("users", "city", IndexKind::equality())?;
//! db.create_vector_index("docs", 384, Metric::Cosine)?;
//!
//! let mut alice = BaseEntity::new("alice");
//! alice.set_field("city", "Berlin")?;
//!
//! let mut txn = db.begin();
//! txn.put_entity("users", &alice)?;
//! txn.add_edge(&Edge::new("f1", "alice", "bob").to_entity()?)?;
//! txn.commit()?;
//! ```
//!
//! # Layers
//!
//! | crate | concern |
//! |---|---|
//! | [`core`] | entities, field values, entity codec, errors |
//! | [`storage`] | LSM engine with snapshots and checkpoints |
//! | [`concurrency`] | optimistic transactions with snapshot isolation |
//! | [`index`] | equality, range, sparse, geo, TTL and fulltext indexes |
//! | [`graph`] | edges, topology cache, traversals |
//! | [`vector`] | HNSW indexes and their files |
//! | [`engine`] | the [`Database`] facade and multi-model transactions |

pub use mosaic_concurrency as concurrency;
pub use mosaic_core as core;
pub use mosaic_durability as durability;
pub use mosaic_engine as engine;
pub use mosaic_graph as graph;
pub use mosaic_index as index;
pub use mosaic_storage as storage;
pub use mosaic_vector as vector;

pub use mosaic_core::{BaseEntity, EntityCodec, Error, FieldValue, Result, Status, StatusCode};
pub use mosaic_engine::{Database, DatabaseBuilder, MosaicConfig, Transaction, TransactionStats};
pub use mosaic_graph::{Edge, EdgeFilter, PathResult};
pub use mosaic_index::{FulltextConfig, IndexKind, IndexType, Predicate, RangeQuery};
pub use mosaic_vector::{Metric, VectorConfig};
