//! Connection Database
//!
//! Edge-list storage for the graph. Connections live in a free-list backed
//! arena; every vertex threads its incoming and outgoing connections through
//! two intrusive singly linked lists whose heads sit in its [`TopologyIndex`].
//!
//! Every mutation bumps the structural version and flags the groups of both
//! endpoints as changed, so the traversal cache only rebuilds what moved.
//!
//! # Costs
//!
//! - `connect` is O(1): the new connection becomes the head of both lists.
//! - `disconnect_and_release` walks each list to find the predecessor, so it
//!   is O(degree) in the worst case.

use indexmap::IndexSet;

use super::flags::TraversalFlags;
use super::node::{TopologyIndex, VertexHandle};
use super::port::{InputPortId, OutputPortId};
use crate::error::{GraphError, Result};

/// Handle to a connection in the database. `0` is never a valid connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionHandle(u32);

impl ConnectionHandle {
    /// The reserved invalid handle, used as list terminator.
    pub const INVALID: Self = Self(0);

    /// True unless this is [`ConnectionHandle::INVALID`].
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Category and direction variant of the edge.
    pub flags: TraversalFlags,
    /// Producing vertex.
    pub source: VertexHandle,
    /// Producing port.
    pub source_port: OutputPortId,
    /// Consuming vertex.
    pub destination: VertexHandle,
    /// Consuming port.
    pub destination_port: InputPortId,
    next_input: ConnectionHandle,
    next_output: ConnectionHandle,
    valid: bool,
}

impl Connection {
    fn vacant() -> Self {
        let nobody = VertexHandle::new(u32::MAX, 0);
        Self {
            flags: TraversalFlags::NONE,
            source: nobody,
            source_port: OutputPortId(0),
            destination: nobody,
            destination_port: InputPortId::scalar(0),
            next_input: ConnectionHandle::INVALID,
            next_output: ConnectionHandle::INVALID,
            valid: false,
        }
    }

    /// False once the connection has been released.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn matches(
        &self,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
        mask: TraversalFlags,
    ) -> bool {
        self.source == source
            && self.source_port == source_port
            && self.destination == destination
            && self.destination_port == destination_port
            && self.flags.intersects(mask)
    }
}

/// The persistent edge store.
#[derive(Debug)]
pub struct Database {
    connections: Vec<Connection>,
    free_connections: Vec<ConnectionHandle>,
    vertices: Vec<Option<TopologyIndex>>,
    vertex_count: usize,
    connection_count: usize,
    version: u64,
    changed_groups: IndexSet<usize>,
}

impl Database {
    /// Create an empty database.
    pub fn new() -> Self {
        Self {
            // Slot 0 backs the invalid handle.
            connections: vec![Connection::vacant()],
            free_connections: Vec::new(),
            vertices: Vec::new(),
            vertex_count: 0,
            connection_count: 0,
            version: 0,
            changed_groups: IndexSet::new(),
        }
    }

    /// Structural version. Bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connection_count
    }

    /// Groups touched since the last recomputation.
    pub fn changed_groups(&self) -> &IndexSet<usize> {
        &self.changed_groups
    }

    /// Register a newly created vertex. It starts in the orphan group.
    pub fn add_vertex(&mut self, vertex: VertexHandle) -> Result<()> {
        let index = vertex.index();
        if index >= self.vertices.len() {
            self.vertices.resize_with(index + 1, || None);
        }
        if let Some(existing) = &self.vertices[index] {
            return Err(GraphError::VertexExists(existing.vertex));
        }

        self.vertices[index] = Some(TopologyIndex::new(vertex));
        self.vertex_count += 1;
        self.mark_changed(0);
        Ok(())
    }

    /// Remove a vertex, releasing every connection still attached to it.
    pub fn remove_vertex(&mut self, vertex: VertexHandle) -> Result<()> {
        self.disconnect_all(vertex)?;
        let group = self.index(vertex)?.group;
        self.vertices[vertex.index()] = None;
        self.vertex_count -= 1;
        self.mark_changed(group);
        Ok(())
    }

    /// True if the vertex is live.
    pub fn contains(&self, vertex: VertexHandle) -> bool {
        self.index(vertex).is_ok()
    }

    /// Topology metadata of a live vertex.
    pub fn index(&self, vertex: VertexHandle) -> Result<&TopologyIndex> {
        match self.vertices.get(vertex.index()) {
            Some(Some(entry)) if entry.vertex == vertex => Ok(entry),
            Some(Some(_)) => Err(GraphError::StaleVertex(vertex)),
            _ => Err(GraphError::UnknownVertex(vertex)),
        }
    }

    pub(crate) fn index_mut(&mut self, vertex: VertexHandle) -> Result<&mut TopologyIndex> {
        match self.vertices.get_mut(vertex.index()) {
            Some(Some(entry)) if entry.vertex == vertex => Ok(entry),
            Some(Some(_)) => Err(GraphError::StaleVertex(vertex)),
            _ => Err(GraphError::UnknownVertex(vertex)),
        }
    }

    /// Iterate over the metadata of every live vertex, in index order.
    pub fn vertices(&self) -> impl Iterator<Item = &TopologyIndex> + '_ {
        self.vertices.iter().flatten()
    }

    pub(crate) fn vertices_mut(&mut self) -> impl Iterator<Item = &mut TopologyIndex> + '_ {
        self.vertices.iter_mut().flatten()
    }

    /// Insert a connection. O(1).
    ///
    /// Duplicate and port-type checks are the caller's job; only the
    /// endpoints' existence is verified.
    pub fn connect(
        &mut self,
        flags: TraversalFlags,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
    ) -> Result<ConnectionHandle> {
        let source_group = self.index(source)?.group;
        let destination_group = self.index(destination)?.group;

        let handle = match self.free_connections.pop() {
            Some(handle) => handle,
            None => {
                self.connections.push(Connection::vacant());
                ConnectionHandle((self.connections.len() - 1) as u32)
            }
        };

        let next_output = self.index(source)?.output_head;
        let next_input = self.index(destination)?.input_head;

        self.connections[handle.slot()] = Connection {
            flags,
            source,
            source_port,
            destination,
            destination_port,
            next_input,
            next_output,
            valid: true,
        };

        self.index_mut(source)?.output_head = handle;
        self.index_mut(destination)?.input_head = handle;

        self.connection_count += 1;
        self.mark_changed(source_group);
        self.mark_changed(destination_group);

        tracing::trace!(
            ?source,
            ?source_port,
            ?destination,
            ?destination_port,
            ?flags,
            "connected"
        );
        Ok(handle)
    }

    /// Look up a connection by its endpoints among edges matching `mask`.
    pub fn find_connection(
        &self,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
        mask: TraversalFlags,
    ) -> Option<ConnectionHandle> {
        let mut current = self.index(destination).ok()?.input_head;
        while current.is_valid() {
            let connection = &self.connections[current.slot()];
            if connection.matches(source, source_port, destination, destination_port, mask) {
                return Some(current);
            }
            current = connection.next_input;
        }
        None
    }

    /// True if a matching connection exists.
    pub fn connection_exists(
        &self,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
        mask: TraversalFlags,
    ) -> bool {
        self.find_connection(source, source_port, destination, destination_port, mask)
            .is_some()
    }

    /// Resolve a handle to its connection. Released handles yield `None`.
    pub fn connection(&self, handle: ConnectionHandle) -> Option<&Connection> {
        self.connections
            .get(handle.slot())
            .filter(|connection| handle.is_valid() && connection.valid)
    }

    /// Find and remove a connection.
    pub fn disconnect(
        &mut self,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
        mask: TraversalFlags,
    ) -> Result<()> {
        let handle = self
            .find_connection(source, source_port, destination, destination_port, mask)
            .ok_or(GraphError::ConnectionNotFound {
                from: source,
                from_port: source_port,
                to: destination,
                to_port: destination_port,
            })?;
        self.disconnect_and_release(handle)
    }

    /// Unlink a resolved connection from both endpoint lists and release it.
    ///
    /// A missing predecessor means the lists are corrupted; that error is
    /// unrecoverable.
    pub fn disconnect_and_release(&mut self, handle: ConnectionHandle) -> Result<()> {
        let connection = match self.connection(handle) {
            Some(connection) => connection.clone(),
            None => {
                return Err(GraphError::CorruptedDatabase(format!(
                    "release of dead connection {handle:?}"
                )))
            }
        };

        self.unlink_input(connection.destination, handle)?;
        self.unlink_output(connection.source, handle)?;

        let source_group = self.index(connection.source)?.group;
        let destination_group = self.index(connection.destination)?.group;

        self.connections[handle.slot()] = Connection::vacant();
        self.free_connections.push(handle);
        self.connection_count -= 1;
        self.mark_changed(source_group);
        self.mark_changed(destination_group);

        tracing::trace!(
            source = ?connection.source,
            destination = ?connection.destination,
            flags = ?connection.flags,
            "disconnected"
        );
        Ok(())
    }

    /// Release every connection entering or leaving `vertex`.
    pub fn disconnect_all(&mut self, vertex: VertexHandle) -> Result<()> {
        let handles: Vec<ConnectionHandle> = self
            .inputs(vertex)
            .chain(self.outputs(vertex))
            .map(|(handle, _)| handle)
            .collect();

        if handles.is_empty() {
            // Still validates the vertex.
            self.index(vertex)?;
        }

        for handle in handles {
            // A self-loop shows up in both lists.
            if self.connection(handle).is_some() {
                self.disconnect_and_release(handle)?;
            }
        }
        Ok(())
    }

    /// Walk the incoming connections of a vertex, most recent first.
    pub fn inputs(&self, vertex: VertexHandle) -> Connections<'_> {
        let head = self
            .index(vertex)
            .map(|index| index.input_head)
            .unwrap_or(ConnectionHandle::INVALID);
        Connections {
            database: self,
            next: head,
            direction: Direction::Input,
        }
    }

    /// Walk the outgoing connections of a vertex, most recent first.
    pub fn outputs(&self, vertex: VertexHandle) -> Connections<'_> {
        let head = self
            .index(vertex)
            .map(|index| index.output_head)
            .unwrap_or(ConnectionHandle::INVALID);
        Connections {
            database: self,
            next: head,
            direction: Direction::Output,
        }
    }

    /// Flag a group for rebuilding and bump the structural version.
    pub fn mark_changed(&mut self, group: usize) {
        self.changed_groups.insert(group);
        self.version += 1;
    }

    /// Flag every group holding a live vertex, forcing a full rebuild.
    pub fn mark_all_changed(&mut self) {
        let groups: Vec<usize> = self.vertices().map(|index| index.group).collect();
        self.changed_groups.insert(0);
        self.changed_groups.extend(groups);
        self.version += 1;
    }

    /// Flag the orphan group without bumping the version, so the next
    /// structural change rebuilds every vertex parked there.
    pub(crate) fn defer_full_rebuild(&mut self) {
        self.changed_groups.insert(0);
    }

    pub(crate) fn take_changed_groups(&mut self) -> IndexSet<usize> {
        std::mem::take(&mut self.changed_groups)
    }

    fn unlink_input(&mut self, vertex: VertexHandle, handle: ConnectionHandle) -> Result<()> {
        let next = self.connections[handle.slot()].next_input;
        let head = self.index(vertex)?.input_head;
        if head == handle {
            self.index_mut(vertex)?.input_head = next;
            return Ok(());
        }

        let mut current = head;
        while current.is_valid() {
            let link = self.connections[current.slot()].next_input;
            if link == handle {
                self.connections[current.slot()].next_input = next;
                return Ok(());
            }
            current = link;
        }

        tracing::error!(?vertex, ?handle, "input list has no predecessor");
        Err(GraphError::CorruptedDatabase(format!(
            "{handle:?} missing from input list of {vertex}"
        )))
    }

    fn unlink_output(&mut self, vertex: VertexHandle, handle: ConnectionHandle) -> Result<()> {
        let next = self.connections[handle.slot()].next_output;
        let head = self.index(vertex)?.output_head;
        if head == handle {
            self.index_mut(vertex)?.output_head = next;
            return Ok(());
        }

        let mut current = head;
        while current.is_valid() {
            let link = self.connections[current.slot()].next_output;
            if link == handle {
                self.connections[current.slot()].next_output = next;
                return Ok(());
            }
            current = link;
        }

        tracing::error!(?vertex, ?handle, "output list has no predecessor");
        Err(GraphError::CorruptedDatabase(format!(
            "{handle:?} missing from output list of {vertex}"
        )))
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Iterator over one of a vertex's intrusive connection lists.
#[derive(Debug)]
pub struct Connections<'a> {
    database: &'a Database,
    next: ConnectionHandle,
    direction: Direction,
}

impl<'a> Iterator for Connections<'a> {
    type Item = (ConnectionHandle, &'a Connection);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.next.is_valid() {
            return None;
        }
        let handle = self.next;
        let connection = &self.database.connections[handle.slot()];
        self.next = match self.direction {
            Direction::Input => connection.next_input,
            Direction::Output => connection.next_output,
        };
        Some((handle, connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(index: u32) -> VertexHandle {
        VertexHandle::new(index, 0)
    }

    fn db_with(count: u32) -> Database {
        let mut db = Database::new();
        for i in 0..count {
            db.add_vertex(v(i)).unwrap();
        }
        db
    }

    #[test]
    fn connect_links_both_lists() {
        let mut db = db_with(2);
        let handle = db
            .connect(
                TraversalFlags::DATA,
                v(0),
                OutputPortId(0),
                v(1),
                InputPortId::scalar(0),
            )
            .unwrap();

        assert!(handle.is_valid());
        assert_eq!(db.connection_count(), 1);
        assert_eq!(db.outputs(v(0)).count(), 1);
        assert_eq!(db.inputs(v(1)).count(), 1);
        assert_eq!(db.inputs(v(0)).count(), 0);
        assert!(db.connection_exists(
            v(0),
            OutputPortId(0),
            v(1),
            InputPortId::scalar(0),
            TraversalFlags::ALL
        ));
    }

    #[test]
    fn connect_rejects_unknown_vertex() {
        let mut db = db_with(1);
        let result = db.connect(
            TraversalFlags::DATA,
            v(0),
            OutputPortId(0),
            v(7),
            InputPortId::scalar(0),
        );
        assert_eq!(result, Err(GraphError::UnknownVertex(v(7))));
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut db = db_with(1);
        assert!(db.contains(v(0)));
        assert!(!db.contains(VertexHandle::new(0, 1)));
        assert_eq!(
            db.index(VertexHandle::new(0, 1)).map(|i| i.vertex),
            Err(GraphError::StaleVertex(VertexHandle::new(0, 1)))
        );
        assert_eq!(db.add_vertex(v(0)), Err(GraphError::VertexExists(v(0))));
    }

    #[test]
    fn find_respects_mask() {
        let mut db = db_with(2);
        db.connect(
            TraversalFlags::MESSAGE,
            v(0),
            OutputPortId(1),
            v(1),
            InputPortId::scalar(2),
        )
        .unwrap();

        let found = db.find_connection(
            v(0),
            OutputPortId(1),
            v(1),
            InputPortId::scalar(2),
            TraversalFlags::MESSAGE,
        );
        assert!(found.is_some());

        let missing = db.find_connection(
            v(0),
            OutputPortId(1),
            v(1),
            InputPortId::scalar(2),
            TraversalFlags::DATA,
        );
        assert!(missing.is_none());
    }

    #[test]
    fn disconnect_from_middle_of_list() {
        let mut db = db_with(4);
        for source in 0..3 {
            db.connect(
                TraversalFlags::DATA,
                v(source),
                OutputPortId(0),
                v(3),
                InputPortId::array(0, source as u16),
            )
            .unwrap();
        }

        db.disconnect(
            v(1),
            OutputPortId(0),
            v(3),
            InputPortId::array(0, 1),
            TraversalFlags::ALL,
        )
        .unwrap();

        let sources: Vec<_> = db.inputs(v(3)).map(|(_, c)| c.source).collect();
        assert_eq!(sources, vec![v(2), v(0)]);
        assert_eq!(db.outputs(v(1)).count(), 0);
        assert_eq!(db.connection_count(), 2);
    }

    #[test]
    fn released_handles_are_reused() {
        let mut db = db_with(2);
        let first = db
            .connect(
                TraversalFlags::DATA,
                v(0),
                OutputPortId(0),
                v(1),
                InputPortId::scalar(0),
            )
            .unwrap();
        db.disconnect_and_release(first).unwrap();
        assert!(db.connection(first).is_none());

        let second = db
            .connect(
                TraversalFlags::DATA,
                v(1),
                OutputPortId(0),
                v(0),
                InputPortId::scalar(0),
            )
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn releasing_twice_is_corruption() {
        let mut db = db_with(2);
        let handle = db
            .connect(
                TraversalFlags::DATA,
                v(0),
                OutputPortId(0),
                v(1),
                InputPortId::scalar(0),
            )
            .unwrap();
        db.disconnect_and_release(handle).unwrap();

        let err = db.disconnect_and_release(handle).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn disconnect_missing_is_not_found() {
        let mut db = db_with(2);
        let err = db
            .disconnect(
                v(0),
                OutputPortId(0),
                v(1),
                InputPortId::scalar(0),
                TraversalFlags::ALL,
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::ConnectionNotFound { .. }));
    }

    #[test]
    fn disconnect_all_handles_self_loops() {
        let mut db = db_with(2);
        db.connect(
            TraversalFlags::DATA,
            v(0),
            OutputPortId(0),
            v(0),
            InputPortId::scalar(0),
        )
        .unwrap();
        db.connect(
            TraversalFlags::DATA,
            v(0),
            OutputPortId(0),
            v(1),
            InputPortId::scalar(0),
        )
        .unwrap();

        db.disconnect_all(v(0)).unwrap();
        assert_eq!(db.connection_count(), 0);
        assert!(!db.index(v(0)).unwrap().has_connections());
        assert!(!db.index(v(1)).unwrap().has_connections());
    }

    #[test]
    fn mutations_bump_version_and_mark_groups() {
        let mut db = db_with(2);
        db.take_changed_groups();
        db.index_mut(v(1)).unwrap().group = 5;

        let before = db.version();
        db.connect(
            TraversalFlags::DATA,
            v(0),
            OutputPortId(0),
            v(1),
            InputPortId::scalar(0),
        )
        .unwrap();

        assert!(db.version() > before);
        let changed: Vec<_> = db.changed_groups().iter().copied().collect();
        assert_eq!(changed, vec![0, 5]);
    }

    #[test]
    fn remove_vertex_releases_connections() {
        let mut db = db_with(3);
        db.connect(
            TraversalFlags::DATA,
            v(0),
            OutputPortId(0),
            v(1),
            InputPortId::scalar(0),
        )
        .unwrap();
        db.connect(
            TraversalFlags::DATA,
            v(1),
            OutputPortId(0),
            v(2),
            InputPortId::scalar(0),
        )
        .unwrap();

        db.remove_vertex(v(1)).unwrap();
        assert_eq!(db.vertex_count(), 2);
        assert_eq!(db.connection_count(), 0);
        assert!(!db.contains(v(1)));
        assert_eq!(db.remove_vertex(v(1)), Err(GraphError::UnknownVertex(v(1))));
    }
}
