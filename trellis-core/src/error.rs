//! Error types.
//!
//! Two families exist. [`TraversalError`]s are structural problems found while
//! recomputing the traversal cache; they are queued and drained by the host.
//! [`GraphError`]s are returned immediately from the failing call, and the
//! invariant-violation variants among them mean the graph must be discarded.

use thiserror::Error;

use crate::graph::{InputPortId, OutputPortId, VertexHandle};

/// Result alias for graph and render operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Structural errors detected during traversal cache recomputation.
///
/// Reporting one of these wipes the cache back to an empty orphan group.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    /// At least one cycle exists among traversal-hierarchy edges.
    #[error("graph contains a cycle among traversal edges")]
    Cycles,

    /// An alternate-hierarchy edge joins vertices placed in different groups.
    #[error("alternate edge {from} -> {to} crosses traversal groups")]
    UnrelatedHierarchy {
        /// Producing vertex of the offending edge.
        from: VertexHandle,
        /// Consuming vertex of the offending edge.
        to: VertexHandle,
    },
}

/// Errors returned directly from graph and render operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The vertex is not present in the graph.
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexHandle),

    /// The handle's index is live under a newer generation.
    #[error("stale vertex handle {0}")]
    StaleVertex(VertexHandle),

    /// A vertex with the same index is already live.
    #[error("vertex {0} already exists")]
    VertexExists(VertexHandle),

    /// No connection matches the requested endpoints.
    #[error("no connection {from}:{from_port:?} -> {to}:{to_port:?}")]
    ConnectionNotFound {
        /// Producing vertex.
        from: VertexHandle,
        /// Producing port.
        from_port: OutputPortId,
        /// Consuming vertex.
        to: VertexHandle,
        /// Consuming port.
        to_port: InputPortId,
    },

    /// The port is not declared by the vertex's kernel layout.
    #[error("port {port} out of range on {vertex}")]
    PortOutOfRange {
        /// Vertex addressed.
        vertex: VertexHandle,
        /// Offending port index.
        port: u16,
    },

    /// The kernel buffer is not declared by the vertex's kernel layout.
    #[error("kernel buffer {buffer} out of range on {vertex}")]
    BufferOutOfRange {
        /// Vertex addressed.
        vertex: VertexHandle,
        /// Offending buffer index.
        buffer: usize,
    },

    /// Port data does not fit the declared layout.
    #[error("invalid data for {vertex}: {reason}")]
    InvalidPortData {
        /// Vertex addressed.
        vertex: VertexHandle,
        /// What did not fit.
        reason: String,
    },

    /// A connection list is inconsistent. Unrecoverable.
    #[error("corrupted connection database: {0}")]
    CorruptedDatabase(String),

    /// More than one connection feeds a single data input. Unrecoverable.
    #[error("{count} connections feed {vertex}:{port:?}")]
    MultipleInputs {
        /// Consuming vertex.
        vertex: VertexHandle,
        /// Port with too many producers.
        port: InputPortId,
        /// Number of producers found.
        count: usize,
    },
}

impl GraphError {
    /// True for invariant violations that leave the graph unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphError::CorruptedDatabase(_) | GraphError::MultipleInputs { .. }
        )
    }
}

/// Errors from loading a [`RenderConfig`](crate::config::RenderConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("failed to parse render config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value outside its allowed range.
    #[error("invalid render config field `{field}`: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
