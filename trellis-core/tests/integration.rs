//! Integration Tests for the Render Pass
//!
//! These tests drive whole render cycles through the public API: diffs in,
//! fences and output values out.

use std::sync::Arc;

use trellis_core::prelude::*;
use trellis_core::render::Ownership;

const ALL_MODELS: [ExecutionModel; 4] = [
    ExecutionModel::Synchronous,
    ExecutionModel::SingleThreaded,
    ExecutionModel::Islands,
    ExecutionModel::MaximallyParallel,
];

fn graph(model: ExecutionModel, culling: bool) -> RenderGraph {
    RenderGraph::new(RenderConfig {
        execution_model: model,
        culling,
        worker_threads: 4,
        ..RenderConfig::default()
    })
    .unwrap()
}

fn v(index: u32) -> VertexHandle {
    VertexHandle::new(index, 0)
}

fn unary() -> Arc<KernelLayout> {
    Arc::new(KernelLayout::new().input::<u32>().output::<u32>())
}

fn binary() -> Arc<KernelLayout> {
    Arc::new(KernelLayout::new().input::<u32>().input::<u32>().output::<u32>())
}

/// Writes 1, 2, 3, ... on successive cycles.
fn counter() -> impl Kernel {
    let mut count = 0u32;
    move |ctx: &mut KernelContext<'_>| {
        count += 1;
        ctx.write(OutputPortId(0), &count)
    }
}

fn map(f: fn(u32) -> u32) -> impl Kernel {
    move |ctx: &mut KernelContext<'_>| {
        let x: u32 = ctx.read(InputPortId::scalar(0))?;
        ctx.write(OutputPortId(0), &f(x))
    }
}

fn sum() -> impl Kernel {
    |ctx: &mut KernelContext<'_>| {
        let a: u32 = ctx.read(InputPortId::scalar(0))?;
        let b: u32 = ctx.read(InputPortId::scalar(1))?;
        ctx.write(OutputPortId(0), &(a + b))
    }
}

fn data(diff: &mut GraphDiff, from: u32, to: u32, port: u16) {
    diff.connect(
        ConnectionKind::Data,
        v(from),
        OutputPortId(0),
        v(to),
        InputPortId::scalar(port),
    );
}

fn read(graph: &RenderGraph, vertex: u32) -> u32 {
    graph.read_output::<u32>(v(vertex), OutputPortId(0)).unwrap()
}

/// A -> B -> C
fn chain(graph: &mut RenderGraph, a_side_effects: bool) {
    let source = if a_side_effects {
        Arc::new(
            KernelLayout::new()
                .input::<u32>()
                .output::<u32>()
                .with_side_effects(),
        )
    } else {
        unary()
    };
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), source, counter())
        .create_vertex(v(1), unary(), map(|x| x + 10))
        .create_vertex(v(2), unary(), map(|x| x * 2));
    data(&mut diff, 0, 1, 0);
    data(&mut diff, 1, 2, 0);
    graph.update(diff).unwrap();
}

#[test]
fn observed_leaf_enables_whole_chain() {
    let mut graph = graph(ExecutionModel::MaximallyParallel, true);
    chain(&mut graph, false);

    // Nothing observable yet: everything culled.
    assert_eq!(graph.stats().kernels_culled, 3);
    assert_eq!(graph.stats().kernels_executed, 0);

    graph.set_observed(v(2), true).unwrap();
    graph.update(GraphDiff::new()).unwrap();

    for i in 0..3 {
        assert!(graph.run_state(v(i)).unwrap().is_enabled());
    }
    assert!(graph
        .run_state(v(2))
        .unwrap()
        .contains(RunState::OBSERVABLE));
    assert_eq!(graph.stats().kernels_executed, 3);
    assert_eq!(read(&graph, 2), (1 + 10) * 2);
}

#[test]
fn side_effecting_root_runs_alone() {
    let mut graph = graph(ExecutionModel::MaximallyParallel, true);
    chain(&mut graph, true);

    assert!(graph.run_state(v(0)).unwrap().is_enabled());
    assert!(!graph.run_state(v(1)).unwrap().is_enabled());
    assert!(!graph.run_state(v(2)).unwrap().is_enabled());

    let stats = graph.stats();
    assert_eq!(stats.kernels_culled, 2);
    assert_eq!(stats.kernels_executed, 1);
    assert_eq!(read(&graph, 0), 1);
    assert_eq!(read(&graph, 1), 0);
}

#[test]
fn culling_disabled_runs_everything() {
    let mut graph = graph(ExecutionModel::Islands, false);
    chain(&mut graph, false);
    assert_eq!(graph.stats().kernels_executed, 3);
    assert_eq!(read(&graph, 2), 22);
}

#[test]
fn feedback_reads_previous_cycle() {
    for model in ALL_MODELS {
        let mut graph = graph(model, false);
        let layout = unary();

        // A = B(previous) + 1, B = A.
        let mut diff = GraphDiff::new();
        diff.create_vertex(v(0), layout.clone(), map(|x| x + 1))
            .create_vertex(v(1), layout, map(|x| x));
        data(&mut diff, 0, 1, 0);
        diff.connect(
            ConnectionKind::Feedback,
            v(1),
            OutputPortId(0),
            v(0),
            InputPortId::scalar(0),
        );
        graph.update(diff).unwrap();
        assert!(graph.drain_errors().is_empty(), "{model:?}");
        assert_eq!(read(&graph, 0), 1, "{model:?}");

        for cycle in 2..=5 {
            graph.update(GraphDiff::new()).unwrap();
            assert_eq!(read(&graph, 0), cycle, "{model:?}");
            assert_eq!(read(&graph, 1), cycle, "{model:?}");
        }
        assert!(graph
            .input_aliases(v(0), InputPortId::scalar(0), v(1), OutputPortId(0))
            .unwrap());
    }
}

#[test]
fn removing_feedback_removes_both_edges() {
    let mut graph = graph(ExecutionModel::Synchronous, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), map(|x| x + 1))
        .create_vertex(v(1), unary(), map(|x| x));
    diff.connect(
        ConnectionKind::Feedback,
        v(1),
        OutputPortId(0),
        v(0),
        InputPortId::scalar(0),
    );
    graph.update(diff).unwrap();
    assert_eq!(graph.topology().database().connection_count(), 2);

    let mut diff = GraphDiff::new();
    diff.disconnect(
        ConnectionKind::Feedback,
        v(1),
        OutputPortId(0),
        v(0),
        InputPortId::scalar(0),
    );
    graph.update(diff).unwrap();
    assert_eq!(graph.topology().database().connection_count(), 0);
    assert!(graph.input_is_blank(v(0), InputPortId::scalar(0)).unwrap());
}

#[test]
fn inputs_alias_upstream_storage() {
    let mut graph = graph(ExecutionModel::MaximallyParallel, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), counter())
        .create_vertex(v(1), unary(), map(|x| x + 1));
    data(&mut diff, 0, 1, 0);
    graph.update(diff).unwrap();

    assert!(graph
        .input_aliases(v(1), InputPortId::scalar(0), v(0), OutputPortId(0))
        .unwrap());
    assert_eq!(
        graph.input_ownership(v(1), InputPortId::scalar(0)).unwrap(),
        Ownership::None
    );

    let mut diff = GraphDiff::new();
    diff.disconnect(
        ConnectionKind::Data,
        v(0),
        OutputPortId(0),
        v(1),
        InputPortId::scalar(0),
    );
    graph.update(diff).unwrap();

    assert!(graph.input_is_blank(v(1), InputPortId::scalar(0)).unwrap());
    // Upstream storage is untouched by the alias going away.
    assert_eq!(read(&graph, 0), 2);
    assert_eq!(read(&graph, 1), 1);
}

#[test]
fn owned_value_is_released_exactly_once() {
    let mut graph = graph(ExecutionModel::SingleThreaded, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), counter())
        .create_vertex(v(1), unary(), map(|x| x + 100))
        .set_input(v(1), InputPortId::scalar(0), &7u32);
    graph.update(diff).unwrap();

    assert_eq!(read(&graph, 1), 107);
    assert_eq!(
        graph.input_ownership(v(1), InputPortId::scalar(0)).unwrap(),
        Ownership::OwnedByPort
    );
    assert_eq!(graph.stats().owned_released, 0);

    let mut diff = GraphDiff::new();
    data(&mut diff, 0, 1, 0);
    graph.update(diff).unwrap();
    assert_eq!(graph.stats().owned_released, 1);
    assert_eq!(
        graph.input_ownership(v(1), InputPortId::scalar(0)).unwrap(),
        Ownership::None
    );
    assert_eq!(read(&graph, 1), 102);

    // Later rebuilds find nothing left to free.
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(2), unary(), counter());
    graph.update(diff).unwrap();
    assert_eq!(graph.stats().owned_released, 0);
}

#[test]
fn deleting_a_vertex_detaches_its_consumers() {
    let mut graph = graph(ExecutionModel::Islands, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), counter())
        .create_vertex(v(1), unary(), map(|x| x + 1));
    data(&mut diff, 0, 1, 0);
    graph.update(diff).unwrap();
    assert_eq!(read(&graph, 1), 2);

    let mut diff = GraphDiff::new();
    diff.delete_vertex(v(0));
    graph.update(diff).unwrap();

    assert!(!graph.contains(v(0)));
    assert_eq!(graph.topology().database().connection_count(), 0);
    assert!(graph.input_is_blank(v(1), InputPortId::scalar(0)).unwrap());
    assert_eq!(read(&graph, 1), 1);

    // The index can be reused under a new generation.
    let reused = VertexHandle::new(0, 1);
    let mut diff = GraphDiff::new();
    diff.create_vertex(reused, unary(), counter());
    graph.update(diff).unwrap();
    assert!(graph.read_output::<u32>(v(0), OutputPortId(0)).is_err());
    assert_eq!(graph.read_output::<u32>(reused, OutputPortId(0)).unwrap(), 1);
}

#[test]
fn cycle_is_queued_and_nothing_runs() {
    let mut graph = graph(ExecutionModel::MaximallyParallel, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), map(|x| x + 1))
        .create_vertex(v(1), unary(), map(|x| x + 1));
    data(&mut diff, 0, 1, 0);
    data(&mut diff, 1, 0, 0);
    graph.update(diff).unwrap();

    assert_eq!(graph.drain_errors(), vec![TraversalError::Cycles]);
    assert_eq!(graph.topology().cache().traversal_count(), 0);
    assert_eq!(graph.stats().kernels_scheduled, 0);

    // Reported once per structural change.
    graph.update(GraphDiff::new()).unwrap();
    assert!(graph.drain_errors().is_empty());

    let mut diff = GraphDiff::new();
    diff.disconnect(
        ConnectionKind::Data,
        v(1),
        OutputPortId(0),
        v(0),
        InputPortId::scalar(0),
    );
    graph.update(diff).unwrap();
    assert!(graph.drain_errors().is_empty());
    assert_eq!(graph.topology().cache().traversal_count(), 2);
    assert_eq!(read(&graph, 1), 2);
}

/// S feeds L = S + 1 and R = 2S, which join in J = L + R. A separate
/// component T -> U runs alongside.
fn diamond(graph: &mut RenderGraph) {
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), counter())
        .create_vertex(v(1), unary(), map(|x| x + 1))
        .create_vertex(v(2), unary(), map(|x| x * 2))
        .create_vertex(v(3), binary(), sum())
        .create_vertex(v(4), unary(), counter())
        .create_vertex(v(5), unary(), map(|x| x * 10));
    data(&mut diff, 0, 1, 0);
    data(&mut diff, 0, 2, 0);
    data(&mut diff, 1, 3, 0);
    data(&mut diff, 2, 3, 1);
    data(&mut diff, 4, 5, 0);
    graph.update(diff).unwrap();
}

#[test]
fn every_model_computes_the_same_values() {
    let mut results = Vec::new();
    for model in ALL_MODELS {
        let mut graph = graph(model, false);
        diamond(&mut graph);
        for _ in 0..2 {
            graph.update(GraphDiff::new()).unwrap();
        }
        let values: Vec<u32> = (0..6).map(|i| read(&graph, i)).collect();
        assert_eq!(values, vec![3, 4, 6, 10, 3, 30], "{model:?}");
        assert_eq!(graph.stats().kernels_executed, 6, "{model:?}");
        results.push(values);
    }
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn switching_models_rebuilds_and_keeps_state() {
    let mut graph = graph(ExecutionModel::Synchronous, false);
    diamond(&mut graph);
    assert_eq!(graph.topology().cache().group_count(), 2);

    graph.set_execution_model(ExecutionModel::MaximallyParallel);
    graph.update(GraphDiff::new()).unwrap();
    assert!(graph.stats().groups_rebuilt > 0);
    assert_eq!(graph.topology().cache().group_count(), 3);
    assert_eq!(read(&graph, 3), 3 * 2 + 1);
}

#[test]
fn long_chain_respects_order_in_parallel() {
    const LENGTH: u32 = 300;
    let mut graph = graph(ExecutionModel::MaximallyParallel, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), counter());
    for i in 1..LENGTH {
        diff.create_vertex(v(i), unary(), map(|x| x + 1));
        data(&mut diff, i - 1, i, 0);
    }
    graph.update(diff).unwrap();
    assert_eq!(read(&graph, LENGTH - 1), LENGTH);

    graph.update(GraphDiff::new()).unwrap();
    assert_eq!(read(&graph, LENGTH - 1), LENGTH + 1);
}

#[test]
fn parent_queries_follow_hierarchies() {
    let mut graph = graph(ExecutionModel::MaximallyParallel, false);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), map(|x| x + 1))
        .create_vertex(v(1), unary(), map(|x| x));
    data(&mut diff, 0, 1, 0);
    diff.connect(
        ConnectionKind::Feedback,
        v(1),
        OutputPortId(0),
        v(0),
        InputPortId::scalar(0),
    );
    graph.update(diff).unwrap();

    let topology = graph.topology();
    let traversal: Vec<_> = topology
        .parents(v(0), Hierarchy::Traversal)
        .unwrap()
        .map(|edge| edge.vertex)
        .collect();
    let alternate: Vec<_> = topology
        .parents(v(0), Hierarchy::Alternate)
        .unwrap()
        .map(|edge| edge.vertex)
        .collect();
    assert!(traversal.is_empty());
    assert_eq!(alternate, vec![v(1)]);
}

#[test]
fn failing_kernel_is_counted() {
    let mut graph = graph(ExecutionModel::Islands, false);
    let broken = |ctx: &mut KernelContext<'_>| ctx.write(OutputPortId(0), &[0u64; 4]);
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), broken)
        .create_vertex(v(1), unary(), counter());
    graph.update(diff).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.kernels_failed, 1);
    assert_eq!(stats.kernels_executed, 1);
}

#[test]
fn panicking_kernel_is_counted_under_every_model() {
    for model in ALL_MODELS {
        let mut graph = graph(model, false);
        let explode = |_: &mut KernelContext<'_>| -> Result<()> { panic!("kernel exploded") };
        let mut diff = GraphDiff::new();
        diff.create_vertex(v(0), unary(), explode)
            .create_vertex(v(1), unary(), map(|x| x + 1));
        data(&mut diff, 0, 1, 0);
        graph.update(diff).unwrap().wait();

        let stats = graph.stats();
        assert_eq!(stats.kernels_failed, 1, "{model:?}");
        assert_eq!(stats.kernels_executed, 1, "{model:?}");
        // The consumer still ran, on the zeroed output.
        assert_eq!(read(&graph, 1), 1, "{model:?}");

        // Later cycles are unaffected.
        graph.update(GraphDiff::new()).unwrap();
        assert_eq!(graph.stats().kernels_failed, 1, "{model:?}");
    }
}

#[test]
fn shared_ancestor_keeps_one_group_with_small_targets() {
    let mut graph = RenderGraph::new(RenderConfig {
        execution_model: ExecutionModel::MaximallyParallel,
        worker_threads: 4,
        target_group_size: Some(1),
        ..RenderConfig::default()
    })
    .unwrap();

    // 2 feeds both 0 and 1, and 0 feeds 1; vertex 0 seeds the search.
    let mut diff = GraphDiff::new();
    diff.create_vertex(v(0), unary(), map(|x| x + 1))
        .create_vertex(v(1), binary(), sum())
        .create_vertex(v(2), unary(), counter());
    data(&mut diff, 2, 0, 0);
    data(&mut diff, 2, 1, 0);
    data(&mut diff, 0, 1, 1);
    graph.update(diff).unwrap();

    assert!(graph.drain_errors().is_empty());
    assert_eq!(graph.stats().kernels_executed, 3);
    assert_eq!(read(&graph, 0), 2);
    assert_eq!(read(&graph, 1), 3);
}

#[test]
fn config_round_trips_through_json() {
    let config =
        RenderConfig::from_json(r#"{ "execution_model": "single_threaded", "worker_threads": 2 }"#)
            .unwrap();
    let graph = RenderGraph::new(config).unwrap();
    assert_eq!(
        graph.config().execution_model,
        ExecutionModel::SingleThreaded
    );
}
