//! Benchmarks for the progression catalog
//!
//! Measures:
//! - Catalog construction (validation + cycle check)
//! - Feature gate checks
//! - Required-node walks over deep prerequisite chains

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use progression_tree::{
    Catalog, GatedFeature, NodeId, NodeKind, NodeSize, Prerequisite, ProgressionNode,
    UnlockedLevels,
};

/// Linear chain `n_0 <- n_1 <- ... <- n_{len-1}`, the last node gating `feature_end`.
fn chain(len: usize) -> Vec<ProgressionNode> {
    (0..len)
        .map(|i| ProgressionNode {
            id: NodeId(0),
            key: format!("n_{i}"),
            name: format!("Node {i}"),
            description: String::new(),
            kind: NodeKind::Feature,
            category: "bench".into(),
            tier: (i % 5) as u32,
            size: NodeSize::Small,
            max_level: 1,
            costs: vec![100],
            prerequisites: if i == 0 {
                vec![]
            } else {
                vec![Prerequisite {
                    node_key: format!("n_{}", i - 1),
                    level: 1,
                }]
            },
            dynamic_prerequisites: vec![],
            features: if i + 1 == len {
                vec![GatedFeature::new("feature_end", 1)]
            } else {
                vec![]
            },
            auto_unlock: false,
            modifier: None,
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog_build");
    for &len in &[10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                || chain(len),
                |nodes| Catalog::new(black_box(nodes)),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_required_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("required_nodes");
    for &len in &[10usize, 100, 1_000] {
        let catalog = Catalog::new(chain(len)).expect("valid chain");
        let mut levels = UnlockedLevels::new();
        // Half the chain unlocked.
        for id in 1..=(len / 2) as u32 {
            levels.insert(NodeId(id), 1);
        }
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| catalog.required_nodes(black_box("feature_end"), &levels))
        });
    }
    group.finish();
}

fn bench_feature_gate(c: &mut Criterion) {
    let catalog = Catalog::new(chain(100)).expect("valid chain");
    let levels = UnlockedLevels::new();
    c.bench_function("is_feature_unlocked", |b| {
        b.iter(|| catalog.is_feature_unlocked(black_box("feature_end"), &levels))
    });
}

criterion_group!(benches, bench_build, bench_required_nodes, bench_feature_gate);
criterion_main!(benches);
