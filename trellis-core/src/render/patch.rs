//! Pointer Patching
//!
//! Points every input at the output that feeds it, or at the blank page when
//! nothing does, and applies the resize commands that touch port storage.
//!
//! # Rules
//!
//! For each input element, the alternate-hierarchy parents feeding it decide:
//!
//! - none: an owned value stays; anything else points at the blank page
//! - one: the input aliases that output, freeing an owned value first
//! - more: invariant violation, reported as [`GraphError::MultipleInputs`]

use tracing::{error, trace};

use super::graph::{KernelNode, NodeTable};
use super::kernel::{InputPort, PortShape};
use super::storage::{BlankPage, PortBuffer, PortPointer, SharedPort};
use crate::error::{GraphError, Result};
use crate::graph::{
    CachedEdge, Hierarchy, InputPortId, OutputPortId, Topology, TraversalFlags, VertexHandle,
};

/// Repoint every input of every node. Returns how many owned values were
/// freed in the process.
pub(crate) fn patch_inputs(
    topology: &Topology,
    nodes: &NodeTable,
    blank: &BlankPage,
) -> Result<usize> {
    let mut released = 0;
    for node in nodes.iter() {
        let mut instance = node.instance.lock();
        for (port, input) in instance.inputs.iter_mut().enumerate() {
            released += patch_port(topology, nodes, blank, node.vertex, port as u16, input)?;
        }
    }
    Ok(released)
}

fn patch_port(
    topology: &Topology,
    nodes: &NodeTable,
    blank: &BlankPage,
    vertex: VertexHandle,
    port: u16,
    input: &mut InputPort,
) -> Result<usize> {
    let mut released = 0;
    for element in 0..input.elements.len() {
        let id = input.id(port, element);
        let mut feeds = topology.parents_of_port(vertex, id, Hierarchy::Alternate)?;
        let first = feeds.next();
        let extra = feeds.count();
        let pointer = &mut input.elements[element];

        match first {
            None => {
                if !matches!(pointer, PortPointer::Owned(_)) {
                    pointer.repoint(blank.port());
                }
            }
            Some(edge) if extra == 0 => {
                if pointer.repoint(upstream(nodes, edge)?) {
                    released += 1;
                    trace!(%vertex, port = ?id, "released owned input value");
                }
            }
            Some(_) => {
                error!(%vertex, port = ?id, count = extra + 1, "input fed by several outputs");
                return Err(GraphError::MultipleInputs {
                    vertex,
                    port: id,
                    count: extra + 1,
                });
            }
        }
    }
    Ok(released)
}

fn upstream<'n>(nodes: &'n NodeTable, edge: &CachedEdge) -> Result<&'n SharedPort> {
    let node = nodes
        .get(edge.vertex)
        .ok_or(GraphError::UnknownVertex(edge.vertex))?;
    output_port(node, edge.output_port)
}

pub(crate) fn output_port(node: &KernelNode, port: OutputPortId) -> Result<&SharedPort> {
    node.outputs
        .get(usize::from(port.0))
        .ok_or(GraphError::PortOutOfRange {
            vertex: node.vertex,
            port: port.0,
        })
}

/// Resize a buffer output in place so aliases stay valid.
///
/// Returns true if the storage was reallocated.
pub(crate) fn resize_output_buffer(
    node: &KernelNode,
    port: OutputPortId,
    len: usize,
) -> Result<bool> {
    let decl = node
        .layout
        .outputs
        .get(usize::from(port.0))
        .ok_or(GraphError::PortOutOfRange {
            vertex: node.vertex,
            port: port.0,
        })?;
    if decl.shape != PortShape::Buffer {
        return Err(GraphError::InvalidPortData {
            vertex: node.vertex,
            reason: format!("output {} is not a buffer", port.0),
        });
    }
    let bytes = byte_len(node.vertex, len, decl.layout.size)?;
    Ok(output_port(node, port)?.write().resize(bytes))
}

/// Resize a kernel-private buffer. Returns true if it was reallocated.
pub(crate) fn resize_kernel_buffer(node: &KernelNode, buffer: usize, len: usize) -> Result<bool> {
    let element = node
        .layout
        .buffers
        .get(buffer)
        .ok_or(GraphError::BufferOutOfRange {
            vertex: node.vertex,
            buffer,
        })?;
    let bytes = byte_len(node.vertex, len, element.size)?;
    let mut instance = node.instance.lock();
    let storage = instance
        .buffers
        .get_mut(buffer)
        .ok_or(GraphError::BufferOutOfRange {
            vertex: node.vertex,
            buffer,
        })?;
    Ok(storage.resize(bytes))
}

/// Grow or shrink a port array. New elements point at the blank page.
///
/// Shrinking fails if a connection still targets a removed element. Returns
/// how many owned values were freed by the shrink.
pub(crate) fn resize_port_array(
    topology: &Topology,
    node: &KernelNode,
    blank: &BlankPage,
    port: u16,
    len: u16,
) -> Result<usize> {
    let database = topology.database();
    let still_connected = database.inputs(node.vertex).any(|(_, connection)| {
        !connection.flags.contains(TraversalFlags::FEEDBACK_BACK_EDGE)
            && connection.destination_port.port == port
            && connection
                .destination_port
                .array_index
                .is_some_and(|index| index >= len)
    });
    if still_connected {
        return Err(GraphError::InvalidPortData {
            vertex: node.vertex,
            reason: format!("port array {port} still has connections beyond {len}"),
        });
    }

    let mut instance = node.instance.lock();
    let input = instance
        .inputs
        .get_mut(usize::from(port))
        .filter(|input| input.decl.array)
        .ok_or(GraphError::PortOutOfRange {
            vertex: node.vertex,
            port,
        })?;

    let len = usize::from(len);
    let released = input
        .elements
        .iter()
        .skip(len)
        .filter(|pointer| matches!(pointer, PortPointer::Owned(_)))
        .count();
    input
        .elements
        .resize_with(len, || PortPointer::Borrowed(blank.port().clone()));
    Ok(released)
}

/// Store an owned value in an unconnected input.
pub(crate) fn set_input_value(
    topology: &Topology,
    node: &KernelNode,
    id: InputPortId,
    bytes: &[u8],
) -> Result<()> {
    let alternate = topology.cache().mask(Hierarchy::Alternate);
    let connected = topology
        .database()
        .inputs(node.vertex)
        .any(|(_, connection)| {
            connection.destination_port == id && connection.flags.intersects(alternate)
        });
    if connected {
        return Err(GraphError::InvalidPortData {
            vertex: node.vertex,
            reason: format!("input {id:?} is connected"),
        });
    }

    let mut instance = node.instance.lock();
    let input = instance
        .inputs
        .get_mut(usize::from(id.port))
        .ok_or(GraphError::PortOutOfRange {
            vertex: node.vertex,
            port: id.port,
        })?;
    let element = input.element(id).ok_or(GraphError::PortOutOfRange {
        vertex: node.vertex,
        port: id.port,
    })?;

    let size = match input.decl.shape {
        PortShape::Scalar => input.decl.layout.size,
        PortShape::Buffer => bytes.len(),
    };
    if bytes.len() > size {
        return Err(GraphError::InvalidPortData {
            vertex: node.vertex,
            reason: format!("{} bytes do not fit input {id:?} of {size}", bytes.len()),
        });
    }

    let mut value = PortBuffer::zeroed(size);
    value.as_bytes_mut()[..bytes.len()].copy_from_slice(bytes);
    input.elements[element] = PortPointer::Owned(Box::new(value));
    Ok(())
}

fn byte_len(vertex: VertexHandle, len: usize, element: usize) -> Result<usize> {
    len.checked_mul(element)
        .ok_or_else(|| GraphError::InvalidPortData {
            vertex,
            reason: format!("{len} elements of {element} bytes overflow"),
        })
}
