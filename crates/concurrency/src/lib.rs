//! Concurrency layer for mosaicdb
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - TransactionContext: read/write set tracking over a pinned snapshot
//! - Snapshot isolation through the storage engine's sequence numbers
//! - Conflict detection at commit time, first committer wins
//!
//! Conflicts surface as `mosaic_core::Error::Conflict` and are retryable;
//! nothing here retries on its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transaction;
pub mod validation;

pub use transaction::{TransactionContext, TransactionStatus};
pub use validation::{validate_transaction, ConflictType, ValidationResult};
