//! Render Pass
//!
//! Evaluates a kernel graph once per cycle on top of the traversal cache.
//!
//! # Overview
//!
//! - Each vertex runs a [`Kernel`] over storage allocated from its
//!   [`KernelLayout`].
//! - Inputs are patched to alias the output that feeds them, so data moves
//!   between kernels without copies.
//! - Work is scheduled as dependency-ordered jobs under one of four
//!   [`ExecutionModel`]s and guarded by [`Fence`]s.
//!
//! # Cycle
//!
//! A host records changes into a [`GraphDiff`], hands it to
//! [`RenderGraph::update`], and reads results back once the returned fence
//! completes.

mod culling;
mod diff;
mod execution;
mod graph;
mod jobs;
mod kernel;
mod patch;
mod storage;

pub use diff::{ConnectionKind, DiffCommand, Endpoints, GraphDiff};
pub use execution::ExecutionModel;
pub use graph::{RenderGraph, RenderStats};
pub use jobs::{Fence, JobSystem};
pub use kernel::{
    InputDecl, Kernel, KernelContext, KernelLayout, OutputDecl, PortLayout, PortShape, PortWrite,
    RunState,
};
pub use storage::{
    BlankPage, Ownership, PortBuffer, PortPointer, PortRead, SharedPort, MIN_ALIGNMENT,
};
