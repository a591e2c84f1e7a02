//! Incremental Recomputation
//!
//! Rebuilds the groups of the traversal cache that the database flagged as
//! changed, leaving every other group untouched.
//!
//! # Algorithm
//!
//! 1. Clear the changed groups and collect every vertex that belonged to one.
//! 2. Vertices without connections go to the orphan group.
//! 3. Every other unresolved vertex seeds a dependency search inside an active
//!    group. The active group is reused while it is smaller than the target
//!    size, so small components get merged into evenly sized groups.
//! 4. The search resolves all traversal parents of a vertex before placing it,
//!    then walks its children so the whole component lands in the group.
//! 5. If fewer vertices were placed than exist, a cycle kept some of them from
//!    ever resolving.
//! 6. Each rebuilt group is rebaked: its parent and child tables are filled
//!    from the database using both hierarchy masks.
//!
//! The search keeps an explicit stack instead of recursing, so graph depth is
//! bounded by heap rather than the thread's call stack. Vertices move through
//! three states: unvisited, resolving, resolved. Meeting a resolving parent
//! means a cycle.
//!
//! In global breadth-first mode every connected vertex is ordered into a single
//! group with Kahn's algorithm, which keeps vertices of similar depth adjacent.

use std::collections::VecDeque;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::cache::{CachedEdge, TraversalCache, ORPHAN_GROUP};
use super::database::Database;
use super::flags::{Hierarchy, TraversalFlags};
use super::node::VertexHandle;
use crate::error::TraversalError;

/// How vertices are ordered and grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingAlgorithm {
    /// One group for all connected vertices, breadth-first biased order.
    GlobalBreadthFirst,
    /// One group per connected component (merged up to a target size).
    LocalDepthFirst,
}

/// Tuning for a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeOptions {
    /// Ordering strategy.
    pub algorithm: SortingAlgorithm,
    /// Worker count used by the group size heuristic.
    pub thread_count: usize,
    /// Overrides the `vertex_count / thread_count` group size heuristic.
    pub target_group_size: Option<usize>,
}

impl Default for RecomputeOptions {
    fn default() -> Self {
        Self {
            algorithm: SortingAlgorithm::LocalDepthFirst,
            thread_count: 1,
            target_group_size: None,
        }
    }
}

impl RecomputeOptions {
    fn target_group_size(&self, vertex_count: usize) -> usize {
        self.target_group_size
            .unwrap_or(vertex_count / self.thread_count.max(1))
            .max(1)
    }
}

/// Rebuild the changed groups of `cache` from `db`.
///
/// Returns the ids of the groups that were rebuilt. On a structural error the
/// cache has already been wiped and the database primed so that the next
/// structural change triggers a full rebuild.
pub(crate) fn recompute(
    db: &mut Database,
    cache: &mut TraversalCache,
    options: &RecomputeOptions,
) -> Result<Vec<usize>, TraversalError> {
    let changed = db.take_changed_groups();
    let version = db.version();

    let result = {
        let mut pass = Recomputation {
            traversal_mask: cache.mask(Hierarchy::Traversal),
            combined_mask: cache.combined_mask(),
            db: &mut *db,
            cache: &mut *cache,
        };
        match options.algorithm {
            SortingAlgorithm::LocalDepthFirst => pass.local_depth_first(&changed, options),
            SortingAlgorithm::GlobalBreadthFirst => pass.global_breadth_first(&changed),
        }
    };

    cache.set_version(version);

    match result {
        Ok(rebuilt) => {
            tracing::debug!(
                version,
                changed = changed.len(),
                rebuilt = rebuilt.len(),
                groups = cache.group_count(),
                "recomputed traversal cache"
            );
            Ok(rebuilt)
        }
        Err(error) => {
            tracing::warn!(version, %error, "traversal cache reset");
            cache.reset();
            for index in db.vertices_mut() {
                index.group = ORPHAN_GROUP;
                index.traversal_index = 0;
                index.resolved = false;
                index.currently_resolving = false;
            }
            db.defer_full_rebuild();
            cache.push_error(error.clone());
            Err(error)
        }
    }
}

/// One level of the explicit parent-walk stack.
struct Frame {
    vertex: VertexHandle,
    parents: SmallVec<[VertexHandle; 4]>,
    cursor: usize,
}

struct Recomputation<'a> {
    db: &'a mut Database,
    cache: &'a mut TraversalCache,
    traversal_mask: TraversalFlags,
    combined_mask: TraversalFlags,
}

impl Recomputation<'_> {
    fn local_depth_first(
        &mut self,
        changed: &IndexSet<usize>,
        options: &RecomputeOptions,
    ) -> Result<Vec<usize>, TraversalError> {
        let collected = self.collect(changed);
        let target = options.target_group_size(self.db.vertex_count());

        let mut rebuilt = Vec::new();
        let mut active: Option<usize> = None;

        for &vertex in &collected {
            let Ok(index) = self.db.index(vertex) else {
                continue;
            };
            if index.resolved {
                continue;
            }
            if !index.has_connections() {
                self.place_orphan(vertex);
                continue;
            }

            let group = match active {
                Some(group)
                    if self
                        .cache
                        .group(group)
                        .is_some_and(|g| g.traversal_count() < target) =>
                {
                    group
                }
                _ => {
                    let group = self.cache.allocate_group();
                    rebuilt.push(group);
                    active = Some(group);
                    group
                }
            };

            if !self.dependency_search(vertex, group) {
                tracing::trace!(?vertex, "dependency search hit a cycle");
            }
        }

        self.verify_complete()?;
        for &group in &rebuilt {
            self.rebake_group(group)?;
        }
        Ok(rebuilt)
    }

    fn global_breadth_first(
        &mut self,
        changed: &IndexSet<usize>,
    ) -> Result<Vec<usize>, TraversalError> {
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        // Everything connected shares one group, so any change rebuilds all.
        let mut every: IndexSet<usize> = self.cache.groups().map(|(id, _)| id).collect();
        every.extend(changed.iter().copied());
        let collected = self.collect(&every);

        let mut connected = Vec::new();
        for &vertex in &collected {
            match self.db.index(vertex) {
                Ok(index) if index.has_connections() => connected.push(vertex),
                Ok(_) => self.place_orphan(vertex),
                Err(_) => {}
            }
        }

        let mut rebuilt = Vec::new();
        if !connected.is_empty() {
            let group = self.cache.allocate_group();
            rebuilt.push(group);
            self.kahn_order(&connected, group);
        }

        self.verify_complete()?;
        for &group in &rebuilt {
            self.rebake_group(group)?;
        }
        Ok(rebuilt)
    }

    /// Clear the given groups and gather every live vertex that belonged to one.
    fn collect(&mut self, groups: &IndexSet<usize>) -> Vec<VertexHandle> {
        for &group in groups {
            self.cache.release_group(group);
        }

        let mut collected = Vec::new();
        for index in self.db.vertices_mut() {
            if groups.contains(&index.group) {
                index.resolved = false;
                index.currently_resolving = false;
                collected.push(index.vertex);
            }
        }
        collected
    }

    fn place_orphan(&mut self, vertex: VertexHandle) {
        let slot = self
            .cache
            .group_mut(ORPHAN_GROUP)
            .push_slot(vertex, true, true);
        if let Ok(index) = self.db.index_mut(vertex) {
            index.group = ORPHAN_GROUP;
            index.traversal_index = slot;
            index.resolved = true;
        }
    }

    /// Fix a vertex's position at the end of `group`'s order.
    fn place(&mut self, vertex: VertexHandle, group: usize) {
        let mask = self.traversal_mask;
        let root = !self.db.inputs(vertex).any(|(_, c)| c.flags.intersects(mask));
        let leaf = !self.db.outputs(vertex).any(|(_, c)| c.flags.intersects(mask));

        let slot = self.cache.group_mut(group).push_slot(vertex, root, leaf);
        if let Ok(index) = self.db.index_mut(vertex) {
            index.group = group;
            index.traversal_index = slot;
            index.resolved = true;
            index.currently_resolving = false;
        }
    }

    fn traversal_parents(&self, vertex: VertexHandle) -> SmallVec<[VertexHandle; 4]> {
        let mask = self.traversal_mask;
        self.db
            .inputs(vertex)
            .filter(|(_, c)| c.flags.intersects(mask))
            .map(|(_, c)| c.source)
            .collect()
    }

    fn traversal_children(&self, vertex: VertexHandle) -> SmallVec<[VertexHandle; 4]> {
        let mask = self.traversal_mask;
        self.db
            .outputs(vertex)
            .filter(|(_, c)| c.flags.intersects(mask))
            .map(|(_, c)| c.destination)
            .collect()
    }

    fn set_resolving(&mut self, vertex: VertexHandle, resolving: bool) {
        if let Ok(index) = self.db.index_mut(vertex) {
            index.currently_resolving = resolving;
        }
    }

    fn enter(&mut self, vertex: VertexHandle) -> Frame {
        self.set_resolving(vertex, true);
        Frame {
            vertex,
            parents: self.traversal_parents(vertex),
            cursor: 0,
        }
    }

    /// Resolve `root` and everything connected to it into `group`.
    ///
    /// Children of placed vertices are queued and searched only once the
    /// parent walk that placed them has unwound, so the walk stack is always
    /// a chain of parent edges and meeting a resolving vertex means a cycle.
    ///
    /// Returns false if a cycle was met. The resolving marks of the walk are
    /// rolled back and its vertices stay unplaced; vertices placed before the
    /// cycle was found keep their slots.
    fn dependency_search(&mut self, root: VertexHandle, group: usize) -> bool {
        let mut queued = vec![root];
        while let Some(vertex) = queued.pop() {
            match self.db.index(vertex) {
                Ok(index) if !index.resolved => {}
                _ => continue,
            }
            if !self.resolve_parents(vertex, group, &mut queued) {
                return false;
            }
        }
        true
    }

    /// Place `start` after all of its unresolved ancestors.
    fn resolve_parents(
        &mut self,
        start: VertexHandle,
        group: usize,
        queued: &mut Vec<VertexHandle>,
    ) -> bool {
        let first = self.enter(start);
        let mut stack = vec![first];

        while let Some(frame) = stack.last_mut() {
            let mut next = None;
            let mut cycle = false;
            while let Some(&parent) = frame.parents.get(frame.cursor) {
                frame.cursor += 1;
                let Ok(index) = self.db.index(parent) else {
                    continue;
                };
                if index.currently_resolving {
                    cycle = true;
                    break;
                }
                if !index.resolved {
                    next = Some(parent);
                    break;
                }
            }

            if cycle {
                for frame in stack.drain(..) {
                    self.set_resolving(frame.vertex, false);
                }
                return false;
            }

            match next {
                Some(parent) => {
                    let frame = self.enter(parent);
                    stack.push(frame);
                }
                None => {
                    let vertex = frame.vertex;
                    stack.pop();
                    self.place(vertex, group);
                    // Reversed so the first child is searched first.
                    queued.extend(self.traversal_children(vertex).into_iter().rev());
                }
            }
        }

        true
    }

    /// Kahn's algorithm over traversal edges among `vertices`.
    fn kahn_order(&mut self, vertices: &[VertexHandle], group: usize) {
        let mask = self.traversal_mask;
        let len = vertices.iter().map(|v| v.index() + 1).max().unwrap_or(0);
        let mut in_degree: Vec<Option<usize>> = vec![None; len];
        let mut queue = VecDeque::new();

        for &vertex in vertices {
            let degree = self
                .db
                .inputs(vertex)
                .filter(|(_, c)| c.flags.intersects(mask))
                .count();
            in_degree[vertex.index()] = Some(degree);
            if degree == 0 {
                queue.push_back(vertex);
            }
        }

        while let Some(vertex) = queue.pop_front() {
            self.place(vertex, group);
            for child in self.traversal_children(vertex) {
                if let Some(Some(degree)) = in_degree.get_mut(child.index()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    fn verify_complete(&self) -> Result<(), TraversalError> {
        let placed = self.cache.traversal_count();
        let live = self.db.vertex_count();
        if placed != live {
            tracing::debug!(placed, live, "unplaced vertices after sweep");
            return Err(TraversalError::Cycles);
        }
        Ok(())
    }

    /// Fill a group's parent and child tables from the database.
    fn rebake_group(&mut self, group: usize) -> Result<(), TraversalError> {
        let mask = self.combined_mask;
        let vertices: Vec<VertexHandle> = match self.cache.group(group) {
            Some(g) => g.slots().iter().map(|slot| slot.vertex).collect(),
            None => return Ok(()),
        };
        self.cache.group_mut(group).clear_tables();

        for (slot, &vertex) in vertices.iter().enumerate() {
            let mut parents: SmallVec<[CachedEdge; 4]> = SmallVec::new();
            for (_, connection) in self.db.inputs(vertex) {
                if !connection.flags.intersects(mask) {
                    continue;
                }
                let peer = self.peer_in_group(connection.source, group).ok_or(
                    TraversalError::UnrelatedHierarchy {
                        from: connection.source,
                        to: vertex,
                    },
                )?;
                parents.push(CachedEdge {
                    flags: connection.flags,
                    vertex: connection.source,
                    traversal_index: peer,
                    output_port: connection.source_port,
                    input_port: connection.destination_port,
                });
            }

            let mut children: SmallVec<[CachedEdge; 4]> = SmallVec::new();
            for (_, connection) in self.db.outputs(vertex) {
                if !connection.flags.intersects(mask) {
                    continue;
                }
                let peer = self.peer_in_group(connection.destination, group).ok_or(
                    TraversalError::UnrelatedHierarchy {
                        from: vertex,
                        to: connection.destination,
                    },
                )?;
                children.push(CachedEdge {
                    flags: connection.flags,
                    vertex: connection.destination,
                    traversal_index: peer,
                    output_port: connection.source_port,
                    input_port: connection.destination_port,
                });
            }

            let target = self.cache.group_mut(group);
            target.set_parents(slot, parents);
            target.set_children(slot, children);
        }
        Ok(())
    }

    fn peer_in_group(&self, vertex: VertexHandle, group: usize) -> Option<usize> {
        self.db
            .index(vertex)
            .ok()
            .filter(|index| index.resolved && index.group == group)
            .map(|index| index.traversal_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::port::{InputPortId, OutputPortId};

    fn v(index: u32) -> VertexHandle {
        VertexHandle::new(index, 0)
    }

    fn setup(count: u32) -> (Database, TraversalCache) {
        let mut db = Database::new();
        for i in 0..count {
            db.add_vertex(v(i)).unwrap();
        }
        let cache = TraversalCache::new(
            TraversalFlags::DEFAULT_TRAVERSAL,
            TraversalFlags::DEFAULT_ALTERNATE,
        );
        (db, cache)
    }

    fn data(db: &mut Database, from: u32, to: u32) {
        db.connect(
            TraversalFlags::DATA,
            v(from),
            OutputPortId(0),
            v(to),
            InputPortId::array(0, from as u16),
        )
        .unwrap();
    }

    fn per_component() -> RecomputeOptions {
        RecomputeOptions {
            algorithm: SortingAlgorithm::LocalDepthFirst,
            thread_count: 1,
            target_group_size: Some(1),
        }
    }

    fn slot_of(db: &Database, vertex: VertexHandle) -> (usize, usize) {
        let index = db.index(vertex).unwrap();
        (index.group, index.traversal_index)
    }

    fn assert_topological(db: &Database, cache: &TraversalCache) {
        let mask = cache.mask(Hierarchy::Traversal);
        for index in db.vertices() {
            for (_, connection) in db.outputs(index.vertex) {
                if !connection.flags.intersects(mask) {
                    continue;
                }
                let (group_u, slot_u) = slot_of(db, connection.source);
                let (group_v, slot_v) = slot_of(db, connection.destination);
                assert_eq!(group_u, group_v);
                assert!(slot_u < slot_v, "{connection:?} out of order");
            }
        }
        assert_eq!(cache.traversal_count(), db.vertex_count());
    }

    #[test]
    fn orders_a_diamond() {
        let (mut db, mut cache) = setup(4);
        // Insert edges so that list order disagrees with topological order.
        data(&mut db, 2, 3);
        data(&mut db, 1, 3);
        data(&mut db, 0, 2);
        data(&mut db, 0, 1);

        let rebuilt = recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_topological(&db, &cache);

        let group = cache.group(rebuilt[0]).unwrap();
        assert_eq!(group.roots().len(), 1);
        assert_eq!(group.leaves().len(), 1);
        assert_eq!(group.slots()[group.roots()[0]].vertex, v(0));
        assert_eq!(group.slots()[group.leaves()[0]].vertex, v(3));
    }

    #[test]
    fn starting_from_a_leaf_still_orders_parents_first() {
        let (mut db, mut cache) = setup(3);
        // Vertex 0 is the sink, so the sweep seeds the search at the leaf.
        data(&mut db, 2, 1);
        data(&mut db, 1, 0);

        recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_topological(&db, &cache);
        assert_eq!(slot_of(&db, v(2)).1, 0);
        assert_eq!(slot_of(&db, v(0)).1, 2);
    }

    #[test]
    fn separate_components_get_separate_groups() {
        let (mut db, mut cache) = setup(5);
        data(&mut db, 0, 1);
        data(&mut db, 2, 3);

        let rebuilt = recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert_ne!(slot_of(&db, v(0)).0, slot_of(&db, v(2)).0);

        // Vertex 4 has no edges.
        assert_eq!(slot_of(&db, v(4)).0, ORPHAN_GROUP);
        assert_eq!(cache.group(ORPHAN_GROUP).unwrap().traversal_count(), 1);
        assert_topological(&db, &cache);
    }

    #[test]
    fn small_components_merge_up_to_target() {
        let (mut db, mut cache) = setup(8);
        for pair in 0..4 {
            data(&mut db, pair * 2, pair * 2 + 1);
        }

        let options = RecomputeOptions {
            algorithm: SortingAlgorithm::LocalDepthFirst,
            thread_count: 2,
            target_group_size: None,
        };
        // 8 vertices over 2 threads: groups fill up to 4 vertices.
        let rebuilt = recompute(&mut db, &mut cache, &options).unwrap();
        assert_eq!(rebuilt.len(), 2);
        for group in rebuilt {
            assert_eq!(cache.group(group).unwrap().traversal_count(), 4);
        }
        assert_topological(&db, &cache);
    }

    #[test]
    fn cycle_resets_cache() {
        let (mut db, mut cache) = setup(4);
        data(&mut db, 0, 1);
        data(&mut db, 1, 2);
        data(&mut db, 2, 1);

        let result = recompute(&mut db, &mut cache, &per_component());
        assert_eq!(result, Err(TraversalError::Cycles));
        assert_eq!(cache.group_count(), 1);
        assert_eq!(cache.traversal_count(), 0);
        assert_eq!(cache.drain_errors(), vec![TraversalError::Cycles]);
        assert!(db.vertices().all(|index| index.group == ORPHAN_GROUP));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (mut db, mut cache) = setup(1);
        data(&mut db, 0, 0);
        let result = recompute(&mut db, &mut cache, &per_component());
        assert_eq!(result, Err(TraversalError::Cycles));
    }

    #[test]
    fn shared_ancestor_is_not_mistaken_for_a_cycle() {
        let (mut db, mut cache) = setup(3);
        // The search seeds at 0, whose parent 2 also feeds 0's child 1.
        data(&mut db, 2, 0);
        data(&mut db, 2, 1);
        data(&mut db, 0, 1);

        let rebuilt = recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_topological(&db, &cache);
    }

    #[test]
    fn every_small_dag_orders_into_one_group_per_component() {
        const COUNT: u32 = 5;
        let pairs: Vec<(u32, u32)> = (0..COUNT)
            .flat_map(|a| (a + 1..COUNT).map(move |b| (a, b)))
            .collect();
        // Relabelings so that vertex indices disagree with dependency order.
        let labelings: [[u32; COUNT as usize]; 4] =
            [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0], [2, 4, 0, 3, 1], [3, 0, 4, 1, 2]];

        for labels in &labelings {
            for subset in 0..(1u32 << pairs.len()) {
                let (mut db, mut cache) = setup(COUNT);
                for (bit, &(a, b)) in pairs.iter().enumerate() {
                    if subset & (1u32 << bit) != 0 {
                        data(&mut db, labels[a as usize], labels[b as usize]);
                    }
                }

                let result = recompute(&mut db, &mut cache, &per_component());
                assert!(result.is_ok(), "{labels:?} {subset:#b}: {result:?}");
                assert_topological(&db, &cache);
            }
        }
    }

    #[test]
    fn breadth_first_detects_cycles_too() {
        let (mut db, mut cache) = setup(3);
        data(&mut db, 0, 1);
        data(&mut db, 1, 2);
        data(&mut db, 2, 0);

        let options = RecomputeOptions {
            algorithm: SortingAlgorithm::GlobalBreadthFirst,
            ..RecomputeOptions::default()
        };
        assert_eq!(
            recompute(&mut db, &mut cache, &options),
            Err(TraversalError::Cycles)
        );
    }

    #[test]
    fn recovers_after_offending_edge_is_removed() {
        let (mut db, mut cache) = setup(2);
        data(&mut db, 0, 1);
        data(&mut db, 1, 0);
        assert!(recompute(&mut db, &mut cache, &per_component()).is_err());

        db.disconnect(
            v(1),
            OutputPortId(0),
            v(0),
            InputPortId::array(0, 1),
            TraversalFlags::ALL,
        )
        .unwrap();
        recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_topological(&db, &cache);
    }

    #[test]
    fn feedback_does_not_form_a_cycle() {
        let (mut db, mut cache) = setup(2);
        data(&mut db, 0, 1);
        // 1 feeds 0 with last cycle's value; the back-edge orders 0 first.
        db.connect(
            TraversalFlags::FEEDBACK,
            v(1),
            OutputPortId(0),
            v(0),
            InputPortId::scalar(1),
        )
        .unwrap();
        db.connect(
            TraversalFlags::FEEDBACK_BACK_EDGE,
            v(0),
            OutputPortId(0),
            v(1),
            InputPortId::scalar(1),
        )
        .unwrap();

        recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_topological(&db, &cache);

        let (group, slot) = slot_of(&db, v(0));
        let alternate = cache.mask(Hierarchy::Alternate);
        let feeding: Vec<_> = cache
            .group(group)
            .unwrap()
            .parents_masked(slot, alternate)
            .map(|edge| edge.vertex)
            .collect();
        assert_eq!(feeding, vec![v(1)]);
    }

    #[test]
    fn alternate_edge_across_groups_is_rejected() {
        let (mut db, mut cache) = setup(4);
        data(&mut db, 0, 1);
        data(&mut db, 2, 3);
        // Feedback without its back-edge bridges two components.
        db.connect(
            TraversalFlags::FEEDBACK,
            v(3),
            OutputPortId(0),
            v(0),
            InputPortId::scalar(5),
        )
        .unwrap();

        let result = recompute(&mut db, &mut cache, &per_component());
        assert!(matches!(
            result,
            Err(TraversalError::UnrelatedHierarchy { .. })
        ));
        assert_eq!(cache.traversal_count(), 0);
    }

    #[test]
    fn unchanged_graph_is_left_alone() {
        let (mut db, mut cache) = setup(4);
        data(&mut db, 0, 1);
        data(&mut db, 2, 3);
        recompute(&mut db, &mut cache, &per_component()).unwrap();

        let before: Vec<_> = db.vertices().map(|i| (i.group, i.traversal_index)).collect();
        let rebuilt = recompute(&mut db, &mut cache, &per_component()).unwrap();
        let after: Vec<_> = db.vertices().map(|i| (i.group, i.traversal_index)).collect();

        assert!(rebuilt.is_empty());
        assert_eq!(before, after);
    }

    #[test]
    fn only_touched_groups_are_rebuilt() {
        let (mut db, mut cache) = setup(5);
        data(&mut db, 0, 1);
        data(&mut db, 2, 3);
        recompute(&mut db, &mut cache, &per_component()).unwrap();
        let untouched = slot_of(&db, v(2));

        data(&mut db, 1, 4);
        let rebuilt = recompute(&mut db, &mut cache, &per_component()).unwrap();

        assert_eq!(rebuilt.len(), 1);
        assert_eq!(slot_of(&db, v(2)), untouched);
        assert_eq!(slot_of(&db, v(4)).0, slot_of(&db, v(0)).0);
        assert_topological(&db, &cache);
    }

    #[test]
    fn disconnected_vertex_returns_to_orphans() {
        let (mut db, mut cache) = setup(2);
        data(&mut db, 0, 1);
        recompute(&mut db, &mut cache, &per_component()).unwrap();

        db.disconnect_all(v(0)).unwrap();
        recompute(&mut db, &mut cache, &per_component()).unwrap();
        assert_eq!(slot_of(&db, v(0)).0, ORPHAN_GROUP);
        assert_eq!(slot_of(&db, v(1)).0, ORPHAN_GROUP);
        assert_eq!(cache.group_count(), 1);
        assert_eq!(cache.traversal_count(), 2);
    }

    #[test]
    fn breadth_first_keeps_depths_together() {
        let (mut db, mut cache) = setup(5);
        // 0 -> {1, 2}, 1 -> 3, 2 -> 4
        data(&mut db, 0, 1);
        data(&mut db, 0, 2);
        data(&mut db, 1, 3);
        data(&mut db, 2, 4);

        let options = RecomputeOptions {
            algorithm: SortingAlgorithm::GlobalBreadthFirst,
            ..RecomputeOptions::default()
        };
        recompute(&mut db, &mut cache, &options).unwrap();
        assert_topological(&db, &cache);

        let depth_one: Vec<_> = [v(1), v(2)].iter().map(|&x| slot_of(&db, x).1).collect();
        let depth_two: Vec<_> = [v(3), v(4)].iter().map(|&x| slot_of(&db, x).1).collect();
        assert!(depth_one.iter().max() < depth_two.iter().min());
    }
}
