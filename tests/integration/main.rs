//! Integration tests across all layers
//!
//! - atomicity: aborted multi-model transactions leave nothing behind, also
//!   after reopen
//! - consistency: every index agrees with stored entities after updates
//! - concurrency: conflicting writers, readers during writes
//! - graph, vectors, fulltext, ttl, encryption: end-to-end scenarios

#[path = "../common/mod.rs"]
mod common;

mod atomicity;
mod concurrency;
mod consistency;
mod encryption;
mod fulltext;
mod graph;
mod ttl;
mod vectors;
