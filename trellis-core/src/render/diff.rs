//! Graph Diffs
//!
//! A [`GraphDiff`] is the batch of structural and data commands applied at the
//! start of a render cycle. Commands apply in the order they were recorded.

use std::sync::Arc;

use super::kernel::{Kernel, KernelLayout};
use crate::graph::{InputPortId, OutputPortId, TraversalFlags, VertexHandle};

/// The kind of a connection as seen by callers.
///
/// Feedback connections are stored as an edge pair so that the consumer is
/// ordered before the producer and reads the previous cycle's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Data,
    Message,
    DomainSpecific,
    Feedback,
}

impl ConnectionKind {
    /// Flags stored on the connection in its data direction.
    pub fn flags(self) -> TraversalFlags {
        match self {
            ConnectionKind::Data => TraversalFlags::DATA,
            ConnectionKind::Message => TraversalFlags::MESSAGE,
            ConnectionKind::DomainSpecific => TraversalFlags::DOMAIN_SPECIFIC,
            ConnectionKind::Feedback => TraversalFlags::FEEDBACK,
        }
    }

    /// True if the connection carries port data that inputs are patched to.
    pub fn carries_data(self) -> bool {
        matches!(self, ConnectionKind::Data | ConnectionKind::Feedback)
    }
}

/// Endpoints of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub kind: ConnectionKind,
    pub source: VertexHandle,
    pub source_port: OutputPortId,
    pub destination: VertexHandle,
    pub destination_port: InputPortId,
}

/// A single recorded change.
pub enum DiffCommand {
    CreateVertex {
        vertex: VertexHandle,
        layout: Arc<KernelLayout>,
        kernel: Box<dyn Kernel>,
    },
    DeleteVertex {
        vertex: VertexHandle,
    },
    Connect(Endpoints),
    Disconnect(Endpoints),
    /// Resize a buffer output to `len` elements.
    ResizeOutputBuffer {
        vertex: VertexHandle,
        port: OutputPortId,
        len: usize,
    },
    /// Resize a kernel-private buffer to `len` elements.
    ResizeKernelBuffer {
        vertex: VertexHandle,
        buffer: usize,
        len: usize,
    },
    /// Resize a port array to `len` inputs.
    ResizePortArray {
        vertex: VertexHandle,
        port: u16,
        len: u16,
    },
    /// Give an unconnected input a value it owns.
    SetInputValue {
        vertex: VertexHandle,
        port: InputPortId,
        bytes: Vec<u8>,
    },
}

impl std::fmt::Debug for DiffCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffCommand::CreateVertex { vertex, layout, .. } => f
                .debug_struct("CreateVertex")
                .field("vertex", vertex)
                .field("layout", layout)
                .finish_non_exhaustive(),
            DiffCommand::DeleteVertex { vertex } => {
                f.debug_struct("DeleteVertex").field("vertex", vertex).finish()
            }
            DiffCommand::Connect(endpoints) => f.debug_tuple("Connect").field(endpoints).finish(),
            DiffCommand::Disconnect(endpoints) => {
                f.debug_tuple("Disconnect").field(endpoints).finish()
            }
            DiffCommand::ResizeOutputBuffer { vertex, port, len } => f
                .debug_struct("ResizeOutputBuffer")
                .field("vertex", vertex)
                .field("port", port)
                .field("len", len)
                .finish(),
            DiffCommand::ResizeKernelBuffer {
                vertex,
                buffer,
                len,
            } => f
                .debug_struct("ResizeKernelBuffer")
                .field("vertex", vertex)
                .field("buffer", buffer)
                .field("len", len)
                .finish(),
            DiffCommand::ResizePortArray { vertex, port, len } => f
                .debug_struct("ResizePortArray")
                .field("vertex", vertex)
                .field("port", port)
                .field("len", len)
                .finish(),
            DiffCommand::SetInputValue {
                vertex,
                port,
                bytes,
            } => f
                .debug_struct("SetInputValue")
                .field("vertex", vertex)
                .field("port", port)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Ordered batch of commands for one render cycle.
#[derive(Debug, Default)]
pub struct GraphDiff {
    commands: Vec<DiffCommand>,
}

impl GraphDiff {
    /// An empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Record an arbitrary command.
    pub fn push(&mut self, command: DiffCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Create a vertex running `kernel` with storage for `layout`.
    pub fn create_vertex(
        &mut self,
        vertex: VertexHandle,
        layout: Arc<KernelLayout>,
        kernel: impl Kernel,
    ) -> &mut Self {
        self.push(DiffCommand::CreateVertex {
            vertex,
            layout,
            kernel: Box::new(kernel),
        })
    }

    /// Delete a vertex and every connection touching it.
    pub fn delete_vertex(&mut self, vertex: VertexHandle) -> &mut Self {
        self.push(DiffCommand::DeleteVertex { vertex })
    }

    /// Connect `source:source_port` to `destination:destination_port`.
    pub fn connect(
        &mut self,
        kind: ConnectionKind,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
    ) -> &mut Self {
        self.push(DiffCommand::Connect(Endpoints {
            kind,
            source,
            source_port,
            destination,
            destination_port,
        }))
    }

    /// Remove a connection previously made with the same arguments.
    pub fn disconnect(
        &mut self,
        kind: ConnectionKind,
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
    ) -> &mut Self {
        self.push(DiffCommand::Disconnect(Endpoints {
            kind,
            source,
            source_port,
            destination,
            destination_port,
        }))
    }

    /// Resize a buffer output to `len` elements.
    pub fn resize_output_buffer(
        &mut self,
        vertex: VertexHandle,
        port: OutputPortId,
        len: usize,
    ) -> &mut Self {
        self.push(DiffCommand::ResizeOutputBuffer { vertex, port, len })
    }

    /// Resize a kernel-private buffer to `len` elements.
    pub fn resize_kernel_buffer(
        &mut self,
        vertex: VertexHandle,
        buffer: usize,
        len: usize,
    ) -> &mut Self {
        self.push(DiffCommand::ResizeKernelBuffer {
            vertex,
            buffer,
            len,
        })
    }

    /// Resize a port array to `len` inputs.
    pub fn resize_port_array(&mut self, vertex: VertexHandle, port: u16, len: u16) -> &mut Self {
        self.push(DiffCommand::ResizePortArray { vertex, port, len })
    }

    /// Give an unconnected input a value of type `T`.
    pub fn set_input<T: bytemuck::Pod>(
        &mut self,
        vertex: VertexHandle,
        port: InputPortId,
        value: &T,
    ) -> &mut Self {
        self.set_input_bytes(vertex, port, bytemuck::bytes_of(value).to_vec())
    }

    /// Give an unconnected input raw bytes.
    pub fn set_input_bytes(
        &mut self,
        vertex: VertexHandle,
        port: InputPortId,
        bytes: Vec<u8>,
    ) -> &mut Self {
        self.push(DiffCommand::SetInputValue {
            vertex,
            port,
            bytes,
        })
    }

    /// Take the recorded commands, leaving the diff empty.
    pub fn take(&mut self) -> Vec<DiffCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl IntoIterator for GraphDiff {
    type Item = DiffCommand;
    type IntoIter = std::vec::IntoIter<DiffCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::render::kernel::KernelContext;

    fn idle(_: &mut KernelContext<'_>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn builder_records_in_order() {
        let a = VertexHandle::new(0, 0);
        let b = VertexHandle::new(1, 0);
        let layout = Arc::new(KernelLayout::new().input::<u32>().output::<u32>());

        let mut diff = GraphDiff::new();
        diff.create_vertex(a, layout.clone(), idle)
            .create_vertex(b, layout, idle)
            .connect(
                ConnectionKind::Data,
                a,
                OutputPortId(0),
                b,
                InputPortId::scalar(0),
            )
            .set_input(a, InputPortId::scalar(0), &5u32);

        assert_eq!(diff.len(), 4);
        let commands: Vec<_> = diff.into_iter().collect();
        assert!(matches!(commands[0], DiffCommand::CreateVertex { vertex, .. } if vertex == a));
        assert!(matches!(commands[2], DiffCommand::Connect(e) if e.destination == b));
        assert!(
            matches!(&commands[3], DiffCommand::SetInputValue { bytes, .. } if bytes.len() == 4)
        );
    }

    #[test]
    fn feedback_connections_carry_data() {
        assert!(ConnectionKind::Feedback.carries_data());
        assert!(!ConnectionKind::Message.carries_data());
        assert_eq!(ConnectionKind::Feedback.flags(), TraversalFlags::FEEDBACK);
    }
}
