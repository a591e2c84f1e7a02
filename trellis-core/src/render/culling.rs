//! Observability Culling
//!
//! A vertex is observable if its kernel has side effects or the host asked to
//! observe it. Sweeping backwards from every observable vertex along the
//! alternate hierarchy enables everything that can influence one; the rest is
//! skipped for the cycle.
//!
//! The sweep keeps an explicit stack so deep chains cannot overflow the
//! thread's stack, and the VISITED flag keeps feedback loops from being walked
//! twice.

use super::graph::NodeTable;
use super::kernel::RunState;
use crate::graph::{Hierarchy, Topology};

/// Recompute every node's run state. Returns the number of culled nodes.
pub(crate) fn update_run_states(topology: &Topology, nodes: &mut NodeTable, culling: bool) -> usize {
    let mut stack = Vec::new();

    for node in nodes.iter_mut() {
        node.run_state = RunState::NONE;
        let observable = node.observed || node.layout.side_effects;
        if observable {
            node.run_state |= RunState::OBSERVABLE;
        }
        if !culling {
            node.run_state |= RunState::ENABLED;
        } else if observable {
            node.run_state |= RunState::ENABLED | RunState::VISITED;
            stack.push(node.vertex);
        }
    }

    while let Some(vertex) = stack.pop() {
        let Ok(parents) = topology.parents(vertex, Hierarchy::Alternate) else {
            continue;
        };
        for edge in parents {
            if let Some(parent) = nodes.get_mut(edge.vertex) {
                if !parent.run_state.contains(RunState::VISITED) {
                    parent.run_state |= RunState::ENABLED | RunState::VISITED;
                    stack.push(edge.vertex);
                }
            }
        }
    }

    nodes
        .iter()
        .filter(|node| !node.run_state.is_enabled())
        .count()
}
