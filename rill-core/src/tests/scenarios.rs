//! End-to-end runs of small graphs on the in-process computers.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::BridgeVariant;
use crate::executor::{ExecutorOptions, GraphExecutor};
use crate::graph::Graph;
use crate::location::Location;
use crate::node::{Node, NodeHandle, NodeKind};
use crate::registry::BridgeRegistry;

use super::nodes::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn add_source(
    graph: &mut Graph,
    name: &str,
    location: &str,
    factory: GeneratorSourceFactory,
) -> NodeHandle {
    let node = Node::new(
        name,
        Location::parse(location),
        NodeKind::Source(Arc::new(factory)),
    )
    .unwrap();
    graph.add_node(node).unwrap()
}

fn add_transform(
    graph: &mut Graph,
    name: &str,
    location: &str,
    kind: NodeKind,
) -> NodeHandle {
    let node = Node::new(name, Location::parse(location), kind).unwrap();
    graph.add_node(node).unwrap()
}

fn run_to_completion(graph: &Graph) {
    run_with_registry(graph, &BridgeRegistry::default());
}

fn run_with_registry(graph: &Graph, bridges: &BridgeRegistry) {
    let mut executor =
        GraphExecutor::start_all(graph, bridges, &ExecutorOptions::default()).unwrap();
    executor.join_all().unwrap();
    executor.stop_all();
    assert!(executor.is_finished());
}

/// Producer -> Square -> Collect, everything on the main worker.
#[test]
fn linear_pipeline_local() {
    init_logging();
    let mut graph = Graph::new();
    let sink = CollectSinkFactory::new();
    let out = sink.collected();

    let a = add_source(&mut graph, "A", "", GeneratorSourceFactory { count: 10 });
    let b = add_transform(
        &mut graph,
        "B",
        "",
        NodeKind::Transform(Arc::new(SquareProcessorFactory::default())),
    );
    let c = add_transform(&mut graph, "C", "", NodeKind::Transform(Arc::new(sink)));
    graph.add_input(&a, "data", &b, "data").unwrap();
    graph.add_input(&b, "data", &c, "data").unwrap();

    run_to_completion(&graph);
    assert_eq!(int_values(&out), vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
}

fn fanout_graph(locations: [&str; 4]) -> (Graph, Collected, Collected) {
    let mut graph = Graph::new();
    let sink1 = CollectSinkFactory::new();
    let out1 = sink1.collected();
    let sink2 = CollectSinkFactory::new();
    let out2 = sink2.collected();

    let a = add_source(
        &mut graph,
        "A",
        locations[0],
        GeneratorSourceFactory { count: 10 },
    );
    let b = add_transform(
        &mut graph,
        "B",
        locations[1],
        NodeKind::Transform(Arc::new(SquareProcessorFactory::default())),
    );
    let c = add_transform(
        &mut graph,
        "C",
        locations[2],
        NodeKind::Transform(Arc::new(sink1)),
    );
    let d = add_transform(
        &mut graph,
        "D",
        locations[3],
        NodeKind::Transform(Arc::new(sink2)),
    );
    graph.add_input(&a, "data", &c, "data").unwrap();
    graph.add_input(&a, "data", &b, "data").unwrap();
    graph.add_input(&b, "data", &d, "data").unwrap();
    (graph, out1, out2)
}

fn assert_fanout_results(out1: &Collected, out2: &Collected) {
    assert_eq!(int_values(out1), (0..10).collect::<Vec<i64>>());
    assert_eq!(
        int_values(out2),
        (0..10).map(|v| v * v).collect::<Vec<i64>>()
    );
}

/// One producer fanning out to an identity sink and through a square into
/// a second sink.
#[test]
fn fanout_local() {
    init_logging();
    let (graph, out1, out2) = fanout_graph(["", "", "", ""]);
    run_to_completion(&graph);
    assert_fanout_results(&out1, &out2);
}

/// Same graph spread over three threads; the bridges become same-process
/// async channels.
#[test]
fn fanout_cross_thread() {
    init_logging();
    let (graph, out1, out2) = fanout_graph(["1", "2", "3", "1"]);
    run_to_completion(&graph);
    assert_fanout_results(&out1, &out2);
}

/// Running the same graph twice produces the same output.
#[test]
fn restart_produces_identical_output() {
    init_logging();
    let (graph, out1, out2) = fanout_graph(["", "", "", ""]);
    for _ in 0..2 {
        run_to_completion(&graph);
        assert_fanout_results(&out1, &out2);
    }
}

/// Counters delivered to a receiver never decrease.
#[test]
fn counters_are_non_decreasing() {
    init_logging();
    let (graph, out1, out2) = fanout_graph(["1", "2", "3", "1"]);
    run_to_completion(&graph);
    for out in [out1, out2] {
        let ctrs = counters(&out);
        assert!(ctrs.windows(2).all(|pair| pair[0] <= pair[1]), "{ctrs:?}");
    }
}

/// Feedback loop: a breaker bootstraps `delayed` with 1000 and the loop
/// adds the running sum back in, one counter later.
#[test]
fn circuit_breaker_loop() {
    init_logging();
    let mut graph = Graph::new();
    let sink = CollectSinkFactory::new();
    let out = sink.collected();

    let prod = add_source(&mut graph, "prod", "", GeneratorSourceFactory { count: 5 });
    let breaker = add_transform(
        &mut graph,
        "breaker",
        "",
        NodeKind::Transform(Arc::new(FeedbackProcessorFactory { fallback: 1000 })),
    );
    let summer = add_transform(
        &mut graph,
        "sum",
        "",
        NodeKind::Transform(Arc::new(SumProcessorFactory::default())),
    );
    let incr = add_transform(
        &mut graph,
        "incr",
        "",
        NodeKind::Transform(Arc::new(IncreaseProcessorFactory::default())),
    );
    let saver = add_transform(&mut graph, "save", "", NodeKind::Transform(Arc::new(sink)));

    graph.add_input(&prod, "data", &breaker, "data").unwrap();
    graph.add_input(&breaker, "data", &summer, "data").unwrap();
    graph
        .add_input(&breaker, "delayed", &summer, "delayed")
        .unwrap();
    graph.add_input(&summer, "data", &incr, "data").unwrap();
    let feedback = graph.add_input(&incr, "data", &breaker, "delayed").unwrap();
    graph.add_input(&summer, "data", &saver, "data").unwrap();

    assert!(feedback.closes_cycle);

    run_to_completion(&graph);
    assert_eq!(int_values(&out), vec![1000, 1001, 1003, 1006, 1010]);
}

/// The breaker scenario also survives a restart.
#[test]
fn circuit_breaker_restart() {
    init_logging();
    let mut graph = Graph::new();
    let sink = CollectSinkFactory::new();
    let out = sink.collected();

    let prod = add_source(&mut graph, "prod", "", GeneratorSourceFactory { count: 5 });
    let breaker = add_transform(
        &mut graph,
        "breaker",
        "",
        NodeKind::Transform(Arc::new(FeedbackProcessorFactory { fallback: 1000 })),
    );
    let summer = add_transform(
        &mut graph,
        "sum",
        "",
        NodeKind::Transform(Arc::new(SumProcessorFactory::default())),
    );
    let incr = add_transform(
        &mut graph,
        "incr",
        "",
        NodeKind::Transform(Arc::new(IncreaseProcessorFactory::default())),
    );
    let saver = add_transform(&mut graph, "save", "", NodeKind::Transform(Arc::new(sink)));

    graph.add_input(&prod, "data", &breaker, "data").unwrap();
    graph.add_input(&breaker, "data", &summer, "data").unwrap();
    graph
        .add_input(&breaker, "delayed", &summer, "delayed")
        .unwrap();
    graph.add_input(&summer, "data", &incr, "data").unwrap();
    graph.add_input(&incr, "data", &breaker, "delayed").unwrap();
    graph.add_input(&summer, "data", &saver, "data").unwrap();

    for _ in 0..2 {
        run_to_completion(&graph);
        assert_eq!(int_values(&out), vec![1000, 1001, 1003, 1006, 1010]);
    }
}

/// An endless producer only ends through `stop_all`.
#[test]
fn stop_ends_an_endless_graph() {
    init_logging();
    let mut graph = Graph::new();
    let sink = CollectSinkFactory::new();
    let out = sink.collected();

    let node = Node::new(
        "A",
        Location::parse(""),
        NodeKind::Source(Arc::new(EndlessSourceFactory {})),
    )
    .unwrap();
    let a = graph.add_node(node).unwrap();
    let b = add_transform(&mut graph, "B", "1", NodeKind::Transform(Arc::new(sink)));
    graph.add_input(&a, "data", &b, "data").unwrap();

    let mut executor = GraphExecutor::start_all(
        &graph,
        &BridgeRegistry::default(),
        &ExecutorOptions::default(),
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(!executor.is_finished());
    executor.stop_all();
    assert!(executor.is_finished());
    assert!(!values(&out).is_empty());
}

/// A registry without async variants still executes the pipeline, through
/// the polling bridge.
#[test]
fn sync_bridges_only() {
    init_logging();
    let registry = BridgeRegistry::new(vec![BridgeVariant::Local, BridgeVariant::ThreadSync]);
    let (graph, out1, out2) = fanout_graph(["1", "2", "2", "1"]);
    run_with_registry(&graph, &registry);
    assert_fanout_results(&out1, &out2);
}

/// Lock fails loudly when no variant claims a connection.
#[test]
fn missing_bridge_variant_is_fatal() {
    init_logging();
    let registry = BridgeRegistry::new(vec![BridgeVariant::Local]);
    let (graph, _out1, _out2) = fanout_graph(["1", "2", "3", "1"]);
    let result = GraphExecutor::start_all(&graph, &registry, &ExecutorOptions::default());
    assert!(matches!(
        result,
        Err(crate::errors::ExecutionError::NoBridgeForConnection(_))
    ));
}
