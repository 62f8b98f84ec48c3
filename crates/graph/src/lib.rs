//! Graph index for mosaicdb
//!
//! Edges are entities in an edge table with `_from` / `_to` vertex ids.
//! [`GraphIndexManager`] keeps outbound and inbound adjacency keys next to
//! them, mirrors the adjacency in an in-memory topology cache and runs
//! traversals against that cache:
//!
//! - breadth-first search with depth limit
//! - Dijkstra shortest path and A* with a caller heuristic
//! - temporal variants restricted to edges valid at an instant
//! - edge queries by validity interval

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod edge;
pub mod manager;
pub mod topology;
pub mod traversal;

pub use edge::{Edge, DEFAULT_EDGE_TABLE};
pub use manager::{EdgeInfo, GraphIndexManager};
pub use topology::{Adjacency, TopologyPatch};
pub use traversal::{EdgeFilter, PathResult};
