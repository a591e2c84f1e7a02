//! Traversal Cache
//!
//! The derived, versioned read-model of the connection database. Vertices are
//! partitioned into groups; each group holds its vertices in a dependency
//! respecting order together with flattened parent and child tables.
//!
//! # Layout
//!
//! ```text
//! Group
//!   slots:        [ A ][ B ][ C ]          topological order
//!   parent_table: [ ...A's parents... | ...B's parents... | ... ]
//!   child_table:  [ ...A's children... | ... ]
//! ```
//!
//! Each [`Slot`] stores a `(table index, count)` pair into both tables. Table
//! entries are [`CachedEdge`]s carrying the peer's slot index and both port
//! ids, which is all the render pass needs to build fences and patch ports.
//!
//! Group `0` is the orphan group. It always exists and only ever holds
//! vertices without connections.

use std::collections::VecDeque;
use std::ops::Range;

use super::flags::{Hierarchy, TraversalFlags};
use super::node::VertexHandle;
use super::port::{InputPortId, OutputPortId};
use crate::error::TraversalError;

/// Id of the permanent orphan group.
pub const ORPHAN_GROUP: usize = 0;

/// One table entry: an edge seen from one of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedEdge {
    /// Flags of the underlying connection.
    pub flags: TraversalFlags,
    /// The vertex at the other end.
    pub vertex: VertexHandle,
    /// Slot of the other end within the same group.
    pub traversal_index: usize,
    /// Producing port of the connection.
    pub output_port: OutputPortId,
    /// Consuming port of the connection.
    pub input_port: InputPortId,
}

/// A vertex's position in its group plus its table ranges.
#[derive(Debug, Clone)]
pub struct Slot {
    /// The vertex in this slot.
    pub vertex: VertexHandle,
    parent_table_index: usize,
    parent_count: usize,
    child_table_index: usize,
    child_count: usize,
}

impl Slot {
    fn new(vertex: VertexHandle) -> Self {
        Self {
            vertex,
            parent_table_index: 0,
            parent_count: 0,
            child_table_index: 0,
            child_count: 0,
        }
    }

    fn parents(&self) -> Range<usize> {
        self.parent_table_index..self.parent_table_index + self.parent_count
    }

    fn children(&self) -> Range<usize> {
        self.child_table_index..self.child_table_index + self.child_count
    }
}

/// A connected component (or several merged ones) with its own ordering.
#[derive(Debug, Clone, Default)]
pub struct Group {
    slots: Vec<Slot>,
    parent_table: Vec<CachedEdge>,
    child_table: Vec<CachedEdge>,
    roots: Vec<usize>,
    leaves: Vec<usize>,
    in_use: bool,
}

impl Group {
    /// Number of vertices placed in this group.
    pub fn traversal_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots in topological order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Slot indices without traversal-hierarchy parents.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Slot indices without traversal-hierarchy children.
    pub fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    /// Every cached parent edge of a slot, in either hierarchy.
    pub fn parents(&self, slot: usize) -> &[CachedEdge] {
        match self.slots.get(slot) {
            Some(slot) => &self.parent_table[slot.parents()],
            None => &[],
        }
    }

    /// Every cached child edge of a slot, in either hierarchy.
    pub fn children(&self, slot: usize) -> &[CachedEdge] {
        match self.slots.get(slot) {
            Some(slot) => &self.child_table[slot.children()],
            None => &[],
        }
    }

    /// Parent edges of a slot whose flags intersect `mask`.
    pub fn parents_masked(
        &self,
        slot: usize,
        mask: TraversalFlags,
    ) -> impl Iterator<Item = &CachedEdge> + '_ {
        self.parents(slot)
            .iter()
            .filter(move |edge| edge.flags.intersects(mask))
    }

    /// Child edges of a slot whose flags intersect `mask`.
    pub fn children_masked(
        &self,
        slot: usize,
        mask: TraversalFlags,
    ) -> impl Iterator<Item = &CachedEdge> + '_ {
        self.children(slot)
            .iter()
            .filter(move |edge| edge.flags.intersects(mask))
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.parent_table.clear();
        self.child_table.clear();
        self.roots.clear();
        self.leaves.clear();
    }

    /// Append a vertex at the end of the order and return its slot.
    pub(crate) fn push_slot(&mut self, vertex: VertexHandle, root: bool, leaf: bool) -> usize {
        let slot = self.slots.len();
        self.slots.push(Slot::new(vertex));
        if root {
            self.roots.push(slot);
        }
        if leaf {
            self.leaves.push(slot);
        }
        slot
    }

    /// Drop both tables ahead of a rebake. Slots, roots and leaves stay.
    pub(crate) fn clear_tables(&mut self) {
        self.parent_table.clear();
        self.child_table.clear();
    }

    pub(crate) fn set_parents(&mut self, slot: usize, edges: impl IntoIterator<Item = CachedEdge>) {
        let start = self.parent_table.len();
        self.parent_table.extend(edges);
        let entry = &mut self.slots[slot];
        entry.parent_table_index = start;
        entry.parent_count = self.parent_table.len() - start;
    }

    pub(crate) fn set_children(
        &mut self,
        slot: usize,
        edges: impl IntoIterator<Item = CachedEdge>,
    ) {
        let start = self.child_table.len();
        self.child_table.extend(edges);
        let entry = &mut self.slots[slot];
        entry.child_table_index = start;
        entry.child_count = self.child_table.len() - start;
    }
}

/// All groups, the version they were computed at, and queued errors.
#[derive(Debug)]
pub struct TraversalCache {
    groups: Vec<Group>,
    free_groups: Vec<usize>,
    version: u64,
    errors: VecDeque<TraversalError>,
    traversal_mask: TraversalFlags,
    alternate_mask: TraversalFlags,
}

impl TraversalCache {
    /// Create an empty cache selecting hierarchies with the given masks.
    pub fn new(traversal_mask: TraversalFlags, alternate_mask: TraversalFlags) -> Self {
        let mut orphans = Group::default();
        orphans.in_use = true;
        Self {
            groups: vec![orphans],
            free_groups: Vec::new(),
            version: 0,
            errors: VecDeque::new(),
            traversal_mask,
            alternate_mask,
        }
    }

    /// Database version this cache was last computed against.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Mask selecting the given hierarchy.
    pub fn mask(&self, hierarchy: Hierarchy) -> TraversalFlags {
        match hierarchy {
            Hierarchy::Traversal => self.traversal_mask,
            Hierarchy::Alternate => self.alternate_mask,
        }
    }

    /// Union of both hierarchy masks; selects what the tables record.
    pub fn combined_mask(&self) -> TraversalFlags {
        self.traversal_mask | self.alternate_mask
    }

    /// Group by id, if it is in use.
    pub fn group(&self, id: usize) -> Option<&Group> {
        self.groups.get(id).filter(|group| group.in_use)
    }

    pub(crate) fn group_mut(&mut self, id: usize) -> &mut Group {
        &mut self.groups[id]
    }

    /// Groups in use with their ids. The orphan group always comes first.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &Group)> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, group)| group.in_use)
    }

    /// Number of groups in use, orphan group included.
    pub fn group_count(&self) -> usize {
        self.groups().count()
    }

    /// Total vertices placed across all groups.
    pub fn traversal_count(&self) -> usize {
        self.groups().map(|(_, group)| group.traversal_count()).sum()
    }

    pub(crate) fn allocate_group(&mut self) -> usize {
        let id = match self.free_groups.pop() {
            Some(id) => id,
            None => {
                self.groups.push(Group::default());
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[id];
        group.clear();
        group.in_use = true;
        id
    }

    /// Empty a group. The orphan group is cleared but never freed.
    pub(crate) fn release_group(&mut self, id: usize) {
        let Some(group) = self.groups.get_mut(id) else {
            return;
        };
        group.clear();
        if id != ORPHAN_GROUP && group.in_use {
            group.in_use = false;
            self.free_groups.push(id);
        }
    }

    /// Wipe back to a single empty orphan group.
    pub(crate) fn reset(&mut self) {
        let mut orphans = Group::default();
        orphans.in_use = true;
        self.groups = vec![orphans];
        self.free_groups.clear();
    }

    pub(crate) fn push_error(&mut self, error: TraversalError) {
        self.errors.push_back(error);
    }

    /// True if structural errors are waiting to be drained.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take every queued structural error, oldest first.
    pub fn drain_errors(&mut self) -> Vec<TraversalError> {
        self.errors.drain(..).collect()
    }
}
