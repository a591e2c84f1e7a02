//! Connection Graph
//!
//! This module implements the persistent edge store for kernel graphs and the
//! traversal cache derived from it.
//!
//! # Overview
//!
//! - Vertices are kernel instances identified by a versioned handle.
//! - Connections run from an output port to an input port and carry a
//!   [`TraversalFlags`] bitmask.
//! - Two hierarchies are views over the same edges, selected by mask. The
//!   traversal hierarchy orders execution; the alternate hierarchy says which
//!   output feeds which input, and reverses feedback edges relative to the
//!   traversal hierarchy.
//!
//! # Design Decisions
//!
//! 1. Connections live in an arena with intrusive per-vertex linked lists:
//!    - Insertion is O(1)
//!    - Handles stay stable while other connections come and go
//!
//! 2. The cache is versioned against the database and only rebuilds groups
//!    that a mutation touched.
//!
//! 3. A structural error resets the cache to empty instead of leaving a
//!    partially valid order behind.

mod cache;
mod database;
mod flags;
mod node;
mod port;
mod recompute;
mod topology;

pub use cache::{CachedEdge, Group, Slot, TraversalCache, ORPHAN_GROUP};
pub use database::{Connection, ConnectionHandle, Connections, Database};
pub use flags::{Hierarchy, TraversalFlags};
pub use node::{TopologyIndex, VertexAllocator, VertexHandle};
pub use port::{InputPortId, OutputPortId};
pub use recompute::{RecomputeOptions, SortingAlgorithm};
pub use topology::{Recomputed, Topology};
