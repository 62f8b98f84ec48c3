//! Database engine for mosaicdb
//!
//! This crate ties the lower layers together:
//! - Database: open/close, configuration, entity CRUD and queries
//! - Transactions spanning entities, secondary indexes, graph edges and
//!   vector indexes
//! - Transaction accounting
//!
//! Only this crate knows which table belongs to which manager.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod database;
pub mod transaction;

pub use coordinator::{TransactionManager, TransactionStats};
pub use database::{Database, DatabaseBuilder, MosaicConfig};
pub use transaction::Transaction;
