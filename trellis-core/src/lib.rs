//! Trellis Core
//!
//! This crate provides the runtime for evaluating graphs of data-processing
//! kernels. It implements:
//!
//! - A connection database of typed, flagged edges between kernel vertices
//! - An incrementally recomputed traversal cache (topological order per group)
//! - Pointer patching that lets inputs read upstream outputs without copies
//! - A render pass scheduled as dependency-ordered jobs on a worker pool
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Connection database, traversal cache and recomputation
//! - `render`: Kernels, port storage, culling and execution models
//! - `config`: Host-facing render configuration
//! - `error`: Error types shared by both layers
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis_core::prelude::*;
//!
//! let mut graph = RenderGraph::new(RenderConfig::default())?;
//! let layout = Arc::new(KernelLayout::new().input::<f32>().output::<f32>());
//! let (a, b) = (VertexHandle::new(0, 0), VertexHandle::new(1, 0));
//!
//! let mut diff = GraphDiff::new();
//! diff.create_vertex(a, layout.clone(), |ctx: &mut KernelContext<'_>| {
//!     ctx.write(OutputPortId(0), &1.5f32)
//! })
//! .create_vertex(b, layout, |ctx: &mut KernelContext<'_>| {
//!     let x: f32 = ctx.read(InputPortId::scalar(0))?;
//!     ctx.write(OutputPortId(0), &(x * 2.0))
//! })
//! .connect(ConnectionKind::Data, a, OutputPortId(0), b, InputPortId::scalar(0));
//!
//! graph.update(diff)?;
//! assert_eq!(graph.read_output::<f32>(b, OutputPortId(0))?, 3.0);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod render;

/// Commonly used types.
pub mod prelude {
    pub use crate::config::RenderConfig;
    pub use crate::error::{GraphError, Result, TraversalError};
    pub use crate::graph::{Hierarchy, InputPortId, OutputPortId, VertexAllocator, VertexHandle};
    pub use crate::render::{
        ConnectionKind, ExecutionModel, Fence, GraphDiff, Kernel, KernelContext, KernelLayout,
        RenderGraph, RenderStats, RunState,
    };
}
