//! Render Graph
//!
//! Drives one render cycle per [`RenderGraph::update`]:
//!
//! 1. Wait for the previous cycle's work to finish
//! 2. Apply the diff to the connection database and node storage
//! 3. Recompute the traversal cache if the structure changed
//! 4. Repatch input pointers after a rebuild
//! 5. Cull vertices that cannot reach anything observable
//! 6. Schedule enabled kernels under the configured execution model
//!
//! The returned [`Fence`] completes when every scheduled kernel has run.
//! Readback methods complete it first, so the host never reads a port a
//! kernel is still writing.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::culling::update_run_states;
use super::diff::{ConnectionKind, DiffCommand, Endpoints, GraphDiff};
use super::execution::{ExecutionCounters, ExecutionModel, Scheduler};
use super::jobs::{Fence, JobSystem};
use super::kernel::{Kernel, KernelInstance, KernelLayout, PortShape, RunState};
use super::patch::{
    output_port, patch_inputs, resize_kernel_buffer, resize_output_buffer, resize_port_array,
    set_input_value,
};
use super::storage::{shared, BlankPage, Ownership, PortBuffer, PortPointer, SharedPort};
use crate::config::RenderConfig;
use crate::error::{ConfigError, GraphError, Result, TraversalError};
use crate::graph::{InputPortId, OutputPortId, Recomputed, Topology, TraversalFlags, VertexHandle};

/// A vertex's kernel together with the storage it owns.
pub(crate) struct KernelNode {
    pub vertex: VertexHandle,
    pub layout: Arc<KernelLayout>,
    pub instance: Arc<Mutex<KernelInstance>>,
    pub outputs: Arc<[SharedPort]>,
    pub fence: Fence,
    pub run_state: RunState,
    /// Set by the host for live external reads or writes.
    pub observed: bool,
}

impl KernelNode {
    pub(super) fn new(
        vertex: VertexHandle,
        layout: Arc<KernelLayout>,
        kernel: Box<dyn Kernel>,
        blank: &BlankPage,
    ) -> Self {
        let outputs = layout
            .outputs
            .iter()
            .map(|decl| {
                shared(match decl.shape {
                    PortShape::Scalar => PortBuffer::zeroed(decl.layout.size),
                    PortShape::Buffer => PortBuffer::new(),
                })
            })
            .collect();
        let instance = KernelInstance::new(kernel, &layout, blank);
        Self {
            vertex,
            layout,
            instance: Arc::new(Mutex::new(instance)),
            outputs,
            fence: Fence::completed(),
            run_state: RunState::NONE,
            observed: false,
        }
    }
}

/// Nodes indexed by vertex index.
#[derive(Default)]
pub(crate) struct NodeTable {
    slots: Vec<Option<KernelNode>>,
}

impl NodeTable {
    pub fn get(&self, vertex: VertexHandle) -> Option<&KernelNode> {
        self.slots
            .get(vertex.index())?
            .as_ref()
            .filter(|node| node.vertex == vertex)
    }

    pub fn get_mut(&mut self, vertex: VertexHandle) -> Option<&mut KernelNode> {
        self.slots
            .get_mut(vertex.index())?
            .as_mut()
            .filter(|node| node.vertex == vertex)
    }

    pub fn insert(&mut self, node: KernelNode) {
        let index = node.vertex.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(node);
    }

    pub fn remove(&mut self, vertex: VertexHandle) -> Option<KernelNode> {
        self.get(vertex)?;
        self.slots[vertex.index()].take()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelNode> + '_ {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut KernelNode> + '_ {
        self.slots.iter_mut().flatten()
    }
}

/// What the last render cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Kernels handed to the execution model.
    pub kernels_scheduled: usize,
    /// Kernels that ran to completion.
    pub kernels_executed: usize,
    /// Kernels that returned an error.
    pub kernels_failed: usize,
    /// Kernels skipped by culling.
    pub kernels_culled: usize,
    /// Traversal groups rebuilt by recomputation.
    pub groups_rebuilt: usize,
    /// Owned input values freed by repatching or array shrinking.
    pub owned_released: usize,
    /// Buffer resizes that needed a fresh allocation.
    pub buffers_reallocated: usize,
}

/// A kernel graph evaluated once per [`update`](Self::update).
pub struct RenderGraph {
    topology: Topology,
    nodes: NodeTable,
    blank: BlankPage,
    jobs: JobSystem,
    config: RenderConfig,
    fence: Fence,
    counters: Arc<ExecutionCounters>,
    stats: RenderStats,
    needs_patch: bool,
}

impl RenderGraph {
    /// Create an empty graph and start its worker pool.
    pub fn new(config: RenderConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let jobs = JobSystem::new(config.resolved_worker_threads())?;
        let topology = Topology::with_options(config.recompute_options());
        debug!(threads = jobs.thread_count(), model = ?config.execution_model, "render graph created");
        Ok(Self {
            topology,
            nodes: NodeTable::default(),
            blank: BlankPage::new(),
            jobs,
            config,
            fence: Fence::completed(),
            counters: Arc::new(ExecutionCounters::default()),
            stats: RenderStats::default(),
            needs_patch: false,
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Connection database and traversal cache.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.topology.database().vertex_count()
    }

    /// True if the vertex is live.
    pub fn contains(&self, vertex: VertexHandle) -> bool {
        self.nodes.get(vertex).is_some()
    }

    /// Switch execution model. Takes effect on the next update, rebuilding
    /// the cache if the model orders vertices differently.
    pub fn set_execution_model(&mut self, model: ExecutionModel) {
        self.config.execution_model = model;
        self.topology.set_algorithm(model.sorting_algorithm());
    }

    /// Enable or disable observability culling from the next update.
    pub fn set_culling(&mut self, culling: bool) {
        self.config.culling = culling;
    }

    /// Mark a vertex as read or written by the host, making it observable.
    pub fn set_observed(&mut self, vertex: VertexHandle, observed: bool) -> Result<()> {
        self.topology.database().index(vertex)?;
        let node = self
            .nodes
            .get_mut(vertex)
            .ok_or(GraphError::UnknownVertex(vertex))?;
        node.observed = observed;
        Ok(())
    }

    /// Apply `diff` and schedule the next render cycle.
    ///
    /// Commands apply in order; if one fails, those before it stay applied
    /// and nothing is scheduled. Structural errors found while recomputing
    /// are queued for [`drain_errors`](Self::drain_errors) instead, and the
    /// cycle runs nothing.
    #[instrument(skip_all, fields(commands = diff.len()))]
    pub fn update(&mut self, diff: GraphDiff) -> Result<Fence> {
        self.fence.wait();
        self.stats = RenderStats::default();
        self.counters = Arc::new(ExecutionCounters::default());

        for command in diff {
            self.apply(command)?;
        }

        match self.topology.recompute() {
            Recomputed::Unchanged => {}
            Recomputed::Rebuilt(groups) => {
                self.stats.groups_rebuilt = groups.len();
                self.needs_patch = true;
            }
            Recomputed::Failed(err) => {
                warn!(error = %err, "traversal cache reset; nothing scheduled");
                for node in self.nodes.iter_mut() {
                    node.fence = Fence::completed();
                    node.run_state = RunState::NONE;
                }
                self.fence = Fence::completed();
                return Ok(self.fence.clone());
            }
        }

        if self.needs_patch {
            let released = patch_inputs(&self.topology, &self.nodes, &self.blank)?;
            self.stats.owned_released += released;
            self.needs_patch = false;
        }

        self.stats.kernels_culled =
            update_run_states(&self.topology, &mut self.nodes, self.config.culling);

        let scheduled = Scheduler {
            topology: &self.topology,
            nodes: &self.nodes,
            jobs: &self.jobs,
            blank: &self.blank,
            counters: &self.counters,
        }
        .schedule(self.config.execution_model);

        for node in self.nodes.iter_mut() {
            node.fence = Fence::completed();
        }
        for (vertex, fence) in scheduled.vertex_fences {
            if let Some(node) = self.nodes.get_mut(vertex) {
                node.fence = fence;
            }
        }
        self.stats.kernels_scheduled = scheduled.scheduled;
        self.fence = scheduled.fence;
        Ok(self.fence.clone())
    }

    /// Fence of the current cycle.
    pub fn fence(&self) -> Fence {
        self.fence.clone()
    }

    /// Block until the current cycle has finished.
    pub fn complete(&self) {
        self.fence.wait();
    }

    /// Fence guarding one vertex's kernel in the current cycle.
    pub fn vertex_fence(&self, vertex: VertexHandle) -> Result<Fence> {
        Ok(self.node(vertex)?.fence.clone())
    }

    /// Run state a vertex was given for the current cycle.
    pub fn run_state(&self, vertex: VertexHandle) -> Result<RunState> {
        Ok(self.node(vertex)?.run_state)
    }

    /// Take every queued structural error, oldest first.
    pub fn drain_errors(&mut self) -> Vec<TraversalError> {
        self.topology.drain_errors()
    }

    /// Statistics of the current cycle, completing it first.
    pub fn stats(&self) -> RenderStats {
        self.complete();
        RenderStats {
            kernels_executed: self.counters.executed.load(Ordering::Relaxed),
            kernels_failed: self.counters.failed.load(Ordering::Relaxed),
            ..self.stats
        }
    }

    /// Read a scalar output, completing the current cycle first.
    pub fn read_output<T: Pod>(&self, vertex: VertexHandle, port: OutputPortId) -> Result<T> {
        self.complete();
        let node = self.node(vertex)?;
        let value = output_port(node, port)?.read().read();
        Ok(value)
    }

    /// Copy a buffer output, completing the current cycle first.
    pub fn read_output_slice<T: Pod>(
        &self,
        vertex: VertexHandle,
        port: OutputPortId,
    ) -> Result<Vec<T>> {
        self.complete();
        let node = self.node(vertex)?;
        let values = output_port(node, port)?.read().as_slice::<T>().to_vec();
        Ok(values)
    }

    /// Who owns the memory an input currently points at.
    pub fn input_ownership(&self, vertex: VertexHandle, port: InputPortId) -> Result<Ownership> {
        self.with_input(vertex, port, |pointer| pointer.ownership())
    }

    /// True if an input currently aliases the given output's storage.
    pub fn input_aliases(
        &self,
        vertex: VertexHandle,
        port: InputPortId,
        source: VertexHandle,
        source_port: OutputPortId,
    ) -> Result<bool> {
        let output = Arc::clone(output_port(self.node(source)?, source_port)?);
        self.with_input(vertex, port, |pointer| pointer.aliases(&output))
    }

    /// True if an input currently points at the blank page.
    pub fn input_is_blank(&self, vertex: VertexHandle, port: InputPortId) -> Result<bool> {
        self.with_input(vertex, port, |pointer| self.blank.is_blank(pointer))
    }

    fn with_input<R>(
        &self,
        vertex: VertexHandle,
        port: InputPortId,
        f: impl FnOnce(&PortPointer) -> R,
    ) -> Result<R> {
        self.complete();
        let node = self.node(vertex)?;
        let instance = node.instance.lock();
        let input = instance
            .inputs
            .get(usize::from(port.port))
            .ok_or(GraphError::PortOutOfRange {
                vertex,
                port: port.port,
            })?;
        let element = input.element(port).ok_or(GraphError::PortOutOfRange {
            vertex,
            port: port.port,
        })?;
        Ok(f(&input.elements[element]))
    }

    fn node(&self, vertex: VertexHandle) -> Result<&KernelNode> {
        self.topology.database().index(vertex)?;
        self.nodes
            .get(vertex)
            .ok_or(GraphError::UnknownVertex(vertex))
    }

    fn apply(&mut self, command: DiffCommand) -> Result<()> {
        match command {
            DiffCommand::CreateVertex {
                vertex,
                layout,
                kernel,
            } => {
                layout.validate(vertex)?;
                self.topology.database_mut().add_vertex(vertex)?;
                self.blank.ensure(layout.max_scalar_input());
                self.nodes
                    .insert(KernelNode::new(vertex, layout, kernel, &self.blank));
            }
            DiffCommand::DeleteVertex { vertex } => {
                self.topology.database_mut().remove_vertex(vertex)?;
                self.nodes.remove(vertex);
            }
            DiffCommand::Connect(endpoints) => {
                self.validate_connection(&endpoints)?;
                let Endpoints {
                    kind,
                    source,
                    source_port,
                    destination,
                    destination_port,
                } = endpoints;
                let database = self.topology.database_mut();
                database.connect(
                    kind.flags(),
                    source,
                    source_port,
                    destination,
                    destination_port,
                )?;
                if kind == ConnectionKind::Feedback {
                    // Orders the consumer before the producer.
                    database.connect(
                        TraversalFlags::FEEDBACK_BACK_EDGE,
                        destination,
                        source_port,
                        source,
                        destination_port,
                    )?;
                }
            }
            DiffCommand::Disconnect(Endpoints {
                kind,
                source,
                source_port,
                destination,
                destination_port,
            }) => {
                let database = self.topology.database_mut();
                database.disconnect(
                    source,
                    source_port,
                    destination,
                    destination_port,
                    kind.flags(),
                )?;
                if kind == ConnectionKind::Feedback {
                    database.disconnect(
                        destination,
                        source_port,
                        source,
                        destination_port,
                        TraversalFlags::FEEDBACK_BACK_EDGE,
                    )?;
                }
            }
            DiffCommand::ResizeOutputBuffer { vertex, port, len } => {
                if resize_output_buffer(self.node(vertex)?, port, len)? {
                    self.stats.buffers_reallocated += 1;
                }
            }
            DiffCommand::ResizeKernelBuffer {
                vertex,
                buffer,
                len,
            } => {
                if resize_kernel_buffer(self.node(vertex)?, buffer, len)? {
                    self.stats.buffers_reallocated += 1;
                }
            }
            DiffCommand::ResizePortArray { vertex, port, len } => {
                let node = self.node(vertex)?;
                let released = resize_port_array(&self.topology, node, &self.blank, port, len)?;
                self.stats.owned_released += released;
                self.needs_patch = true;
            }
            DiffCommand::SetInputValue {
                vertex,
                port,
                bytes,
            } => {
                set_input_value(&self.topology, self.node(vertex)?, port, &bytes)?;
            }
        }
        Ok(())
    }

    fn validate_connection(&self, endpoints: &Endpoints) -> Result<()> {
        let source = self.node(endpoints.source)?;
        let destination = self.node(endpoints.destination)?;
        if !endpoints.kind.carries_data() {
            return Ok(());
        }

        output_port(source, endpoints.source_port)?;

        let port = endpoints.destination_port;
        let instance = destination.instance.lock();
        let addressable = instance
            .inputs
            .get(usize::from(port.port))
            .and_then(|input| input.element(port))
            .is_some();
        if addressable {
            Ok(())
        } else {
            Err(GraphError::PortOutOfRange {
                vertex: endpoints.destination,
                port: port.port,
            })
        }
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        self.fence.wait();
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("vertices", &self.vertex_count())
            .field("config", &self.config)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}
