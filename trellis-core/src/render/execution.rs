//! Execution Models
//!
//! Turns the traversal cache into scheduled work. Every model respects the
//! same ordering guarantee: a vertex runs after all of its traversal parents.
//! They differ only in how much of the graph shares one job.
//!
//! | Model               | Jobs                 | Ordering source          |
//! |---------------------|----------------------|--------------------------|
//! | `Synchronous`       | none, runs inline    | global order             |
//! | `SingleThreaded`    | one                  | global order             |
//! | `Islands`           | one per group        | order within each group  |
//! | `MaximallyParallel` | one per vertex       | fences of parent jobs    |

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::graph::NodeTable;
use super::jobs::{Fence, JobSystem};
use super::kernel::KernelInstance;
use super::storage::{BlankPage, SharedPort};
use crate::graph::{Hierarchy, SortingAlgorithm, Topology, VertexHandle};

/// How a render cycle's kernels are distributed over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// Run every kernel on the calling thread during `update`.
    Synchronous,
    /// Run every kernel in order inside a single job.
    SingleThreaded,
    /// Run each traversal group as its own job.
    Islands,
    /// Run each kernel as its own job, gated on its parents.
    #[default]
    MaximallyParallel,
}

impl ExecutionModel {
    /// The ordering strategy this model wants from the traversal cache.
    pub fn sorting_algorithm(self) -> SortingAlgorithm {
        match self {
            ExecutionModel::Synchronous | ExecutionModel::SingleThreaded => {
                SortingAlgorithm::GlobalBreadthFirst
            }
            ExecutionModel::Islands | ExecutionModel::MaximallyParallel => {
                SortingAlgorithm::LocalDepthFirst
            }
        }
    }
}

/// Counters shared with running jobs.
#[derive(Debug, Default)]
pub(crate) struct ExecutionCounters {
    pub executed: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Everything one kernel evaluation needs, detached from the graph.
#[derive(Clone)]
struct VertexJob {
    vertex: VertexHandle,
    instance: Arc<Mutex<KernelInstance>>,
    outputs: Arc<[SharedPort]>,
    blank: BlankPage,
    counters: Arc<ExecutionCounters>,
}

impl VertexJob {
    /// Run the kernel once. Errors and panics are counted as failures.
    fn run(&self) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.instance
                .lock()
                .run(self.vertex, &self.outputs, &self.blank)
        }));
        match result {
            Ok(Ok(())) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(vertex = %self.vertex, error = %err, "kernel failed");
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(vertex = %self.vertex, "kernel panicked");
            }
        }
    }
}

/// Result of scheduling one cycle.
#[derive(Debug)]
pub(crate) struct Scheduled {
    /// Completes when every scheduled kernel has finished.
    pub fence: Fence,
    /// Fence guarding each scheduled vertex.
    pub vertex_fences: Vec<(VertexHandle, Fence)>,
    /// Kernels handed out.
    pub scheduled: usize,
}

/// Schedules enabled vertices of `topology` under a given model.
pub(crate) struct Scheduler<'a> {
    pub topology: &'a Topology,
    pub nodes: &'a NodeTable,
    pub jobs: &'a JobSystem,
    pub blank: &'a BlankPage,
    pub counters: &'a Arc<ExecutionCounters>,
}

impl Scheduler<'_> {
    pub fn schedule(&self, model: ExecutionModel) -> Scheduled {
        let scheduled = match model {
            ExecutionModel::Synchronous => self.synchronous(),
            ExecutionModel::SingleThreaded => self.single_threaded(),
            ExecutionModel::Islands => self.islands(),
            ExecutionModel::MaximallyParallel => self.maximally_parallel(),
        };
        debug!(?model, kernels = scheduled.scheduled, "scheduled render cycle");
        scheduled
    }

    fn job(&self, vertex: VertexHandle) -> Option<VertexJob> {
        let node = self.nodes.get(vertex)?;
        node.run_state.is_enabled().then(|| VertexJob {
            vertex,
            instance: Arc::clone(&node.instance),
            outputs: Arc::clone(&node.outputs),
            blank: self.blank.clone(),
            counters: Arc::clone(self.counters),
        })
    }

    /// Enabled jobs per group, each in traversal order.
    fn group_jobs(&self) -> Vec<Vec<VertexJob>> {
        self.topology
            .cache()
            .groups()
            .map(|(_, group)| {
                group
                    .slots()
                    .iter()
                    .filter_map(|slot| self.job(slot.vertex))
                    .collect::<Vec<_>>()
            })
            .filter(|jobs| !jobs.is_empty())
            .collect()
    }

    fn synchronous(&self) -> Scheduled {
        let mut vertex_fences = Vec::new();
        for job in self.group_jobs().into_iter().flatten() {
            job.run();
            vertex_fences.push((job.vertex, Fence::completed()));
        }
        Scheduled {
            fence: Fence::completed(),
            scheduled: vertex_fences.len(),
            vertex_fences,
        }
    }

    fn single_threaded(&self) -> Scheduled {
        let all: Vec<VertexJob> = self.group_jobs().into_iter().flatten().collect();
        if all.is_empty() {
            return Scheduled {
                fence: Fence::completed(),
                vertex_fences: Vec::new(),
                scheduled: 0,
            };
        }
        let vertices: Vec<VertexHandle> = all.iter().map(|job| job.vertex).collect();
        let fence = self.jobs.schedule(&Fence::completed(), move || {
            for job in &all {
                job.run();
            }
        });
        Scheduled {
            scheduled: vertices.len(),
            vertex_fences: vertices.into_iter().map(|v| (v, fence.clone())).collect(),
            fence,
        }
    }

    fn islands(&self) -> Scheduled {
        let mut vertex_fences = Vec::new();
        let mut group_fences = Vec::new();
        for jobs in self.group_jobs() {
            let vertices: Vec<VertexHandle> = jobs.iter().map(|job| job.vertex).collect();
            let fence = self.jobs.schedule(&Fence::completed(), move || {
                for job in &jobs {
                    job.run();
                }
            });
            vertex_fences.extend(vertices.into_iter().map(|v| (v, fence.clone())));
            group_fences.push(fence);
        }
        Scheduled {
            fence: Fence::combine(group_fences),
            scheduled: vertex_fences.len(),
            vertex_fences,
        }
    }

    fn maximally_parallel(&self) -> Scheduled {
        let mask = self.topology.cache().mask(Hierarchy::Traversal);
        let mut vertex_fences = Vec::new();
        let mut all = Vec::new();

        for (_, group) in self.topology.cache().groups() {
            let mut slot_fences: Vec<Fence> = Vec::with_capacity(group.traversal_count());
            for (index, slot) in group.slots().iter().enumerate() {
                let fence = match self.job(slot.vertex) {
                    Some(job) => {
                        // Parents precede children in the group, so their
                        // fences already exist.
                        let dependencies = Fence::combine(
                            group
                                .parents_masked(index, mask)
                                .filter_map(|edge| slot_fences.get(edge.traversal_index))
                                .cloned(),
                        );
                        let fence = self.jobs.schedule(&dependencies, move || job.run());
                        vertex_fences.push((slot.vertex, fence.clone()));
                        all.push(fence.clone());
                        fence
                    }
                    None => Fence::completed(),
                };
                slot_fences.push(fence);
            }
        }

        Scheduled {
            fence: Fence::combine(all),
            scheduled: vertex_fences.len(),
            vertex_fences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_pick_matching_sort() {
        assert_eq!(
            ExecutionModel::Synchronous.sorting_algorithm(),
            SortingAlgorithm::GlobalBreadthFirst
        );
        assert_eq!(
            ExecutionModel::SingleThreaded.sorting_algorithm(),
            SortingAlgorithm::GlobalBreadthFirst
        );
        assert_eq!(
            ExecutionModel::Islands.sorting_algorithm(),
            SortingAlgorithm::LocalDepthFirst
        );
        assert_eq!(
            ExecutionModel::MaximallyParallel.sorting_algorithm(),
            SortingAlgorithm::LocalDepthFirst
        );
    }

    #[test]
    fn model_names_are_snake_case() {
        let model: ExecutionModel = serde_json::from_str("\"single_threaded\"").unwrap();
        assert_eq!(model, ExecutionModel::SingleThreaded);
        assert_eq!(
            serde_json::to_string(&ExecutionModel::MaximallyParallel).unwrap(),
            "\"maximally_parallel\""
        );
    }
}
