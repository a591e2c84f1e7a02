//! Topology
//!
//! Owns the connection database together with the traversal cache derived
//! from it, and answers "what feeds this port" style queries against the last
//! successful recomputation.

use super::cache::{CachedEdge, TraversalCache};
use super::database::Database;
use super::flags::{Hierarchy, TraversalFlags};
use super::node::VertexHandle;
use super::port::{InputPortId, OutputPortId};
use super::recompute::{recompute, RecomputeOptions, SortingAlgorithm};
use crate::error::{Result, TraversalError};

/// What a call to [`Topology::recompute`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recomputed {
    /// The structural version was unchanged; nothing was touched.
    Unchanged,
    /// These groups were rebuilt.
    Rebuilt(Vec<usize>),
    /// A structural error wiped the cache. The error is also queued.
    Failed(TraversalError),
}

/// Connection database plus its traversal cache.
#[derive(Debug)]
pub struct Topology {
    database: Database,
    cache: TraversalCache,
    options: RecomputeOptions,
}

impl Topology {
    /// Create an empty topology with explicit hierarchy masks.
    pub fn new(
        options: RecomputeOptions,
        traversal_mask: TraversalFlags,
        alternate_mask: TraversalFlags,
    ) -> Self {
        Self {
            database: Database::new(),
            cache: TraversalCache::new(traversal_mask, alternate_mask),
            options,
        }
    }

    /// Create an empty topology using the default data/feedback masks.
    pub fn with_options(options: RecomputeOptions) -> Self {
        Self::new(
            options,
            TraversalFlags::DEFAULT_TRAVERSAL,
            TraversalFlags::DEFAULT_ALTERNATE,
        )
    }

    /// The connection database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Mutable access to the connection database.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// The traversal cache as of the last recomputation.
    pub fn cache(&self) -> &TraversalCache {
        &self.cache
    }

    /// Current recomputation options.
    pub fn options(&self) -> &RecomputeOptions {
        &self.options
    }

    /// Switch ordering strategy. A different strategy forces a full rebuild.
    pub fn set_algorithm(&mut self, algorithm: SortingAlgorithm) {
        if self.options.algorithm != algorithm {
            self.options.algorithm = algorithm;
            self.database.mark_all_changed();
        }
    }

    /// Update the worker count used by the group size heuristic.
    pub fn set_thread_count(&mut self, thread_count: usize) {
        self.options.thread_count = thread_count.max(1);
    }

    /// True if the database changed since the cache was computed.
    pub fn is_stale(&self) -> bool {
        self.cache.version() != self.database.version()
    }

    /// Bring the cache up to date with the database.
    pub fn recompute(&mut self) -> Recomputed {
        if !self.is_stale() {
            return Recomputed::Unchanged;
        }
        match recompute(&mut self.database, &mut self.cache, &self.options) {
            Ok(groups) => Recomputed::Rebuilt(groups),
            Err(error) => Recomputed::Failed(error),
        }
    }

    /// Take every queued structural error, oldest first.
    pub fn drain_errors(&mut self) -> Vec<TraversalError> {
        self.cache.drain_errors()
    }

    /// Group and slot of a vertex in the cache, if it has been placed.
    pub fn locate(&self, vertex: VertexHandle) -> Option<(usize, usize)> {
        let index = self.database.index(vertex).ok()?;
        let group = self.cache.group(index.group)?;
        let slot = group.slots().get(index.traversal_index)?;
        (slot.vertex == vertex).then_some((index.group, index.traversal_index))
    }

    /// Parent edges of a vertex in the given hierarchy.
    pub fn parents(
        &self,
        vertex: VertexHandle,
        hierarchy: Hierarchy,
    ) -> Result<impl Iterator<Item = &CachedEdge> + '_> {
        let mask = self.cache.mask(hierarchy);
        Ok(self
            .parent_edges(vertex)?
            .iter()
            .filter(move |edge| edge.flags.intersects(mask)))
    }

    /// Child edges of a vertex in the given hierarchy.
    pub fn children(
        &self,
        vertex: VertexHandle,
        hierarchy: Hierarchy,
    ) -> Result<impl Iterator<Item = &CachedEdge> + '_> {
        let mask = self.cache.mask(hierarchy);
        Ok(self
            .child_edges(vertex)?
            .iter()
            .filter(move |edge| edge.flags.intersects(mask)))
    }

    /// Parent edges feeding one input port.
    pub fn parents_of_port(
        &self,
        vertex: VertexHandle,
        port: InputPortId,
        hierarchy: Hierarchy,
    ) -> Result<impl Iterator<Item = &CachedEdge> + '_> {
        Ok(self
            .parents(vertex, hierarchy)?
            .filter(move |edge| edge.input_port == port))
    }

    /// Child edges leaving one output port.
    pub fn children_of_port(
        &self,
        vertex: VertexHandle,
        port: OutputPortId,
        hierarchy: Hierarchy,
    ) -> Result<impl Iterator<Item = &CachedEdge> + '_> {
        Ok(self
            .children(vertex, hierarchy)?
            .filter(move |edge| edge.output_port == port))
    }

    fn parent_edges(&self, vertex: VertexHandle) -> Result<&[CachedEdge]> {
        self.database.index(vertex)?;
        Ok(match self.locate(vertex) {
            Some((group, slot)) => self
                .cache
                .group(group)
                .map(|g| g.parents(slot))
                .unwrap_or(&[]),
            None => &[],
        })
    }

    fn child_edges(&self, vertex: VertexHandle) -> Result<&[CachedEdge]> {
        self.database.index(vertex)?;
        Ok(match self.locate(vertex) {
            Some((group, slot)) => self
                .cache
                .group(group)
                .map(|g| g.children(slot))
                .unwrap_or(&[]),
            None => &[],
        })
    }
}
