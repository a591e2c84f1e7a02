//! Kernels
//!
//! A kernel is the user code a vertex runs. Its [`KernelLayout`] declares the
//! data ports and private buffers the render graph allocates for it; at run
//! time it sees them through a [`KernelContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! let layout = KernelLayout::new().input::<f32>().output::<f32>();
//! let double = |ctx: &mut KernelContext<'_>| {
//!     let value: f32 = ctx.read(InputPortId::scalar(0))?;
//!     ctx.write(OutputPortId(0), &(value * 2.0))
//! };
//! ```

use std::ops::{BitOr, BitOrAssign, Deref, DerefMut};

use bytemuck::Pod;
use parking_lot::RwLockWriteGuard;

use super::storage::{BlankPage, PortBuffer, PortPointer, PortRead, SharedPort, MIN_ALIGNMENT};
use crate::error::{GraphError, Result};
use crate::graph::{InputPortId, OutputPortId, VertexHandle};

/// Size and alignment of one port value or buffer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    /// Size in bytes.
    pub size: usize,
    /// Alignment in bytes.
    pub align: usize,
}

impl PortLayout {
    /// Layout of `T`.
    pub fn of<T: Pod>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }
}

/// Whether a port carries one value or a resizable run of elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortShape {
    /// A single value of the declared layout.
    Scalar,
    /// A buffer of elements of the declared layout.
    Buffer,
}

/// Declaration of one output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDecl {
    pub layout: PortLayout,
    pub shape: PortShape,
}

/// Declaration of one input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDecl {
    pub layout: PortLayout,
    pub shape: PortShape,
    /// Port arrays hold a resizable number of independently connected inputs.
    pub array: bool,
}

/// Everything the render graph must allocate for a kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelLayout {
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    /// Kernel-private buffers; the layout is per element.
    pub buffers: Vec<PortLayout>,
    /// Kernels with side effects are always observable.
    pub side_effects: bool,
}

impl KernelLayout {
    /// An empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scalar input of type `T`.
    pub fn input<T: Pod>(mut self) -> Self {
        self.inputs.push(InputDecl {
            layout: PortLayout::of::<T>(),
            shape: PortShape::Scalar,
            array: false,
        });
        self
    }

    /// Append a buffer input with elements of type `T`.
    pub fn input_buffer<T: Pod>(mut self) -> Self {
        self.inputs.push(InputDecl {
            layout: PortLayout::of::<T>(),
            shape: PortShape::Buffer,
            array: false,
        });
        self
    }

    /// Append a port array of scalar `T` inputs, initially empty.
    pub fn input_array<T: Pod>(mut self) -> Self {
        self.inputs.push(InputDecl {
            layout: PortLayout::of::<T>(),
            shape: PortShape::Scalar,
            array: true,
        });
        self
    }

    /// Append a scalar output of type `T`.
    pub fn output<T: Pod>(mut self) -> Self {
        self.outputs.push(OutputDecl {
            layout: PortLayout::of::<T>(),
            shape: PortShape::Scalar,
        });
        self
    }

    /// Append a buffer output with elements of type `T`, initially empty.
    pub fn output_buffer<T: Pod>(mut self) -> Self {
        self.outputs.push(OutputDecl {
            layout: PortLayout::of::<T>(),
            shape: PortShape::Buffer,
        });
        self
    }

    /// Append a kernel-private buffer with elements of type `T`.
    pub fn buffer<T: Pod>(mut self) -> Self {
        self.buffers.push(PortLayout::of::<T>());
        self
    }

    /// Mark the kernel as having side effects.
    pub fn with_side_effects(mut self) -> Self {
        self.side_effects = true;
        self
    }

    /// Largest scalar input, which bounds reads from the blank page.
    pub(crate) fn max_scalar_input(&self) -> usize {
        self.inputs
            .iter()
            .filter(|decl| decl.shape == PortShape::Scalar)
            .map(|decl| decl.layout.size)
            .max()
            .unwrap_or(0)
    }

    /// Reject layouts whose alignment storage cannot honour.
    pub(crate) fn validate(&self, vertex: VertexHandle) -> Result<()> {
        let layouts = self
            .inputs
            .iter()
            .map(|d| d.layout)
            .chain(self.outputs.iter().map(|d| d.layout))
            .chain(self.buffers.iter().copied());
        for layout in layouts {
            if layout.align > MIN_ALIGNMENT {
                return Err(GraphError::InvalidPortData {
                    vertex,
                    reason: format!(
                        "alignment {} exceeds the supported {MIN_ALIGNMENT}",
                        layout.align
                    ),
                });
            }
        }
        Ok(())
    }
}

/// User code run by a vertex.
pub trait Kernel: Send + 'static {
    /// Read inputs and write outputs for one evaluation.
    fn execute(&mut self, ctx: &mut KernelContext<'_>) -> Result<()>;
}

impl<F> Kernel for F
where
    F: FnMut(&mut KernelContext<'_>) -> Result<()> + Send + 'static,
{
    fn execute(&mut self, ctx: &mut KernelContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// Per-vertex evaluation state flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState(u8);

impl RunState {
    pub const NONE: Self = Self(0);
    /// Scheduled to execute this cycle.
    pub const ENABLED: Self = Self(1);
    /// Seeds culling: has side effects or was explicitly observed.
    pub const OBSERVABLE: Self = Self(1 << 1);
    /// Reached by the current culling sweep.
    pub const VISITED: Self = Self(1 << 2);

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if the vertex runs this cycle.
    pub const fn is_enabled(self) -> bool {
        self.contains(Self::ENABLED)
    }
}

impl BitOr for RunState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RunState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One declared input and the storage it currently reads.
#[derive(Debug)]
pub(crate) struct InputPort {
    pub decl: InputDecl,
    /// One pointer for plain inputs, one per element for port arrays.
    pub elements: Vec<PortPointer>,
}

impl InputPort {
    pub fn new(decl: InputDecl, blank: &BlankPage) -> Self {
        let elements = if decl.array {
            Vec::new()
        } else {
            vec![PortPointer::Borrowed(blank.port().clone())]
        };
        Self { decl, elements }
    }

    /// Slot index for an input id, if the id addresses this port correctly.
    pub fn element(&self, id: InputPortId) -> Option<usize> {
        match (self.decl.array, id.array_index) {
            (false, None) => Some(0),
            (true, Some(index)) if usize::from(index) < self.elements.len() => {
                Some(usize::from(index))
            }
            _ => None,
        }
    }

    /// Input id of element `index`.
    pub fn id(&self, port: u16, index: usize) -> InputPortId {
        if self.decl.array {
            InputPortId::array(port, index as u16)
        } else {
            InputPortId::scalar(port)
        }
    }
}

/// A kernel with its inputs and private buffers.
pub(crate) struct KernelInstance {
    pub kernel: Box<dyn Kernel>,
    pub inputs: Vec<InputPort>,
    pub buffers: Vec<PortBuffer>,
}

impl KernelInstance {
    pub fn new(kernel: Box<dyn Kernel>, layout: &KernelLayout, blank: &BlankPage) -> Self {
        Self {
            kernel,
            inputs: layout
                .inputs
                .iter()
                .map(|decl| InputPort::new(*decl, blank))
                .collect(),
            buffers: vec![PortBuffer::new(); layout.buffers.len()],
        }
    }

    /// Run the kernel once against its current storage.
    pub fn run(
        &mut self,
        vertex: VertexHandle,
        outputs: &[SharedPort],
        blank: &BlankPage,
    ) -> Result<()> {
        let KernelInstance {
            kernel,
            inputs,
            buffers,
        } = self;
        let mut ctx = KernelContext {
            vertex,
            inputs,
            outputs,
            buffers,
            blank,
        };
        kernel.execute(&mut ctx)
    }
}

impl std::fmt::Debug for KernelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelInstance")
            .field("inputs", &self.inputs)
            .field("buffers", &self.buffers)
            .finish_non_exhaustive()
    }
}

/// Write access to an output port.
pub struct PortWrite<'a>(RwLockWriteGuard<'a, PortBuffer>);

impl Deref for PortWrite<'_> {
    type Target = PortBuffer;

    fn deref(&self) -> &PortBuffer {
        &self.0
    }
}

impl DerefMut for PortWrite<'_> {
    fn deref_mut(&mut self) -> &mut PortBuffer {
        &mut self.0
    }
}

/// What a kernel sees while it executes.
pub struct KernelContext<'a> {
    vertex: VertexHandle,
    inputs: &'a [InputPort],
    outputs: &'a [SharedPort],
    buffers: &'a mut [PortBuffer],
    blank: &'a BlankPage,
}

impl<'a> KernelContext<'a> {
    /// The vertex being evaluated.
    pub fn vertex(&self) -> VertexHandle {
        self.vertex
    }

    /// Number of elements in a port array.
    pub fn array_len(&self, port: u16) -> Result<usize> {
        self.input_port(port).map(|input| input.elements.len())
    }

    /// Read access to an input's storage.
    ///
    /// An unconnected buffer input reads as empty.
    pub fn input(&self, id: InputPortId) -> Result<PortRead<'_>> {
        let port = self.input_port(id.port)?;
        let element = port.element(id).ok_or(GraphError::PortOutOfRange {
            vertex: self.vertex,
            port: id.port,
        })?;
        let pointer = &port.elements[element];
        if port.decl.shape == PortShape::Buffer && self.blank.is_blank(pointer) {
            return Ok(PortRead::Empty);
        }
        Ok(pointer.read())
    }

    /// Read a scalar input.
    pub fn read<T: Pod>(&self, id: InputPortId) -> Result<T> {
        Ok(self.input(id)?.read())
    }

    /// Copy a buffer input out as elements of `T`.
    pub fn read_slice<T: Pod>(&self, id: InputPortId) -> Result<Vec<T>> {
        Ok(self.input(id)?.as_slice::<T>().to_vec())
    }

    /// Write access to an output's storage.
    pub fn output(&self, port: OutputPortId) -> Result<PortWrite<'_>> {
        let shared = self
            .outputs
            .get(usize::from(port.0))
            .ok_or(GraphError::PortOutOfRange {
                vertex: self.vertex,
                port: port.0,
            })?;
        Ok(PortWrite(shared.write()))
    }

    /// Write a scalar output.
    pub fn write<T: Pod>(&self, port: OutputPortId, value: &T) -> Result<()> {
        if self.output(port)?.write(value) {
            Ok(())
        } else {
            Err(GraphError::InvalidPortData {
                vertex: self.vertex,
                reason: format!(
                    "{} bytes do not fit output {}",
                    std::mem::size_of::<T>(),
                    port.0
                ),
            })
        }
    }

    /// Copy elements into a buffer output. The buffer must already be large
    /// enough; extra elements are rejected.
    pub fn write_slice<T: Pod>(&self, port: OutputPortId, values: &[T]) -> Result<()> {
        let mut output = self.output(port)?;
        let target = output.as_mut_slice::<T>();
        if values.len() > target.len() {
            return Err(GraphError::InvalidPortData {
                vertex: self.vertex,
                reason: format!(
                    "{} elements do not fit output {} of {} elements",
                    values.len(),
                    port.0,
                    target.len()
                ),
            });
        }
        target[..values.len()].copy_from_slice(values);
        Ok(())
    }

    /// A kernel-private buffer.
    pub fn buffer(&mut self, index: usize) -> Result<&mut PortBuffer> {
        let vertex = self.vertex;
        self.buffers
            .get_mut(index)
            .ok_or(GraphError::BufferOutOfRange {
                vertex,
                buffer: index,
            })
    }

    fn input_port(&self, port: u16) -> Result<&'a InputPort> {
        self.inputs
            .get(usize::from(port))
            .ok_or(GraphError::PortOutOfRange {
                vertex: self.vertex,
                port,
            })
    }
}
