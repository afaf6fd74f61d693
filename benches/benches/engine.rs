use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sonora_engine::nodes::{Constant, Gain, Mixer};
use sonora_engine::{Simulation, SimulationConfig};
use sonora_graph::{build_plan, Graph, NodeId};

/// A layered random DAG: every node in a layer feeds one or two nodes of the
/// next layer, and the last layer feeds the output.
fn layered_graph(layers: usize, width: usize, seed: u64) -> Graph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = Graph::new(64, 2);
    let mut previous: Vec<NodeId> = (0..width)
        .map(|_| graph.add_node(Constant::new(0.1).spec(2)))
        .collect();
    for _ in 1..layers {
        let layer: Vec<NodeId> = (0..width)
            .map(|_| graph.add_node(Mixer::new(2, 2).spec()))
            .collect();
        for &node in &previous {
            let target = layer[rng.gen_range(0..width)];
            let _ = graph.connect(node, 0, target, rng.gen_range(0..2));
            if rng.gen_bool(0.5) {
                let extra = layer[rng.gen_range(0..width)];
                let _ = graph.connect(node, 0, extra, rng.gen_range(0..2));
            }
        }
        previous = layer;
    }
    for node in previous {
        let _ = graph.connect_to_output(node, 0);
    }
    graph
}

fn planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning");
    for (layers, width) in [(4, 8), (8, 32), (16, 64)] {
        let graph = layered_graph(layers, width, 7);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{width}")),
            &graph,
            |b, graph| b.iter(|| build_plan(graph, graph.sink()).expect("plan")),
        );
    }
    group.finish();
}

fn tracks(simulation: &Simulation, count: usize) {
    let mut scene = simulation.lock();
    let mixer = scene.add_node(Mixer::new(count, 2).spec());
    for track in 0..count {
        let source = scene.add_node(Constant::new(0.01 * track as f32).spec(2));
        let gain = scene.add_node(Gain::new(0.5).spec(2));
        scene.connect(source, 0, gain, 0).expect("connect");
        scene.connect(gain, 0, mixer, track).expect("connect");
        scene
            .schedule_linear_ramp(gain, Gain::GAIN, 10.0, 1.0)
            .expect("ramp");
    }
    scene.connect_to_output(mixer, 0).expect("connect");
}

fn rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendering");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for threads in [1, 2, 4] {
        group.bench_function(BenchmarkId::new("48_tracks_block64", threads), |b| {
            let config = SimulationConfig::new(48_000, 64).with_threads(threads);
            let simulation = Simulation::new(config).expect("simulation");
            tracks(&simulation, 48);
            let mut out = vec![0.0f32; 64 * 2];
            b.iter(|| simulation.get_block(&mut out, 2));
        });
    }

    group.finish();
}

criterion_group!(benches, planning, rendering);
criterion_main!(benches);
