//! Graph Vertices
//!
//! This module defines the vertex identifiers that live in the connection
//! database, and the per-vertex topology bookkeeping.

use std::fmt;

use super::database::ConnectionHandle;

/// Versioned identifier for a kernel instance in the graph.
///
/// The index addresses per-vertex tables; the generation tells a live vertex
/// apart from an older one that used to occupy the same index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexHandle {
    index: u32,
    generation: u32,
}

impl VertexHandle {
    /// Create a handle from its raw parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index of the vertex.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot this handle refers to.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for VertexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}g{}", self.index, self.generation)
    }
}

impl fmt::Display for VertexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Hands out [`VertexHandle`]s, reusing released indices with a bumped
/// generation.
///
/// Hosts that already own an identifier scheme can build handles with
/// [`VertexHandle::new`] instead.
#[derive(Debug, Default)]
pub struct VertexAllocator {
    generations: Vec<u32>,
    occupied: Vec<bool>,
    free: Vec<u32>,
}

impl VertexAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh handle.
    pub fn allocate(&mut self) -> VertexHandle {
        match self.free.pop() {
            Some(index) => {
                self.occupied[index as usize] = true;
                VertexHandle::new(index, self.generations[index as usize])
            }
            None => {
                let index = self.generations.len() as u32;
                self.generations.push(0);
                self.occupied.push(true);
                VertexHandle::new(index, 0)
            }
        }
    }

    /// Release a handle. Stale or unknown handles are ignored.
    pub fn release(&mut self, vertex: VertexHandle) {
        if self.is_live(vertex) {
            self.generations[vertex.index()] += 1;
            self.occupied[vertex.index()] = false;
            self.free.push(vertex.index);
        }
    }

    /// Check whether the handle is the current occupant of its index.
    pub fn is_live(&self, vertex: VertexHandle) -> bool {
        self.occupied.get(vertex.index()) == Some(&true)
            && self.generations[vertex.index()] == vertex.generation
    }
}

/// Per-vertex topology metadata kept by the connection database.
///
/// `traversal_index`, `resolved` and `currently_resolving` are only meaningful
/// while the traversal cache is being recomputed.
#[derive(Debug, Clone)]
pub struct TopologyIndex {
    /// The vertex occupying this entry.
    pub vertex: VertexHandle,

    /// Head of the incoming connection list.
    pub input_head: ConnectionHandle,

    /// Head of the outgoing connection list.
    pub output_head: ConnectionHandle,

    /// Group the vertex was last placed in.
    pub group: usize,

    /// Position of the vertex in its group's slot list.
    pub traversal_index: usize,

    /// Set once the vertex has a fixed slot in the current recomputation.
    pub resolved: bool,

    /// Set while the dependency search is resolving the vertex's parents.
    pub currently_resolving: bool,
}

impl TopologyIndex {
    /// Fresh metadata for a vertex in the orphan group.
    pub fn new(vertex: VertexHandle) -> Self {
        Self {
            vertex,
            input_head: ConnectionHandle::INVALID,
            output_head: ConnectionHandle::INVALID,
            group: 0,
            traversal_index: 0,
            resolved: false,
            currently_resolving: false,
        }
    }

    /// True if the vertex has at least one incoming or outgoing connection.
    pub fn has_connections(&self) -> bool {
        self.input_head.is_valid() || self.output_head.is_valid()
    }
}
