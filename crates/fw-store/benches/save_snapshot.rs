use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use fw_core::{
    AnchorEdge, AnchorId, FragmentId, FrozenAnchor, FrozenSnapshot, Pose, SessionSnapshot,
    Vector3,
};
use fw_store::Store;

fn chain(n: u64) -> SessionSnapshot {
    let anchors = (0..n)
        .map(|i| FrozenAnchor {
            id: AnchorId(2 + i),
            fragment_id: FragmentId(2 + i / 50),
            pose: Pose::from_position(Vector3::new(i as f64 * 1.1, 0.0, 0.0)),
        })
        .collect();
    let edges = (0..n.saturating_sub(1))
        .filter_map(|i| AnchorEdge::new(AnchorId(2 + i), AnchorId(3 + i)))
        .collect();
    SessionSnapshot {
        frozen: FrozenSnapshot {
            anchors,
            edges,
            alignment: Pose::identity(),
            most_significant: FragmentId(2),
        },
        next_anchor_id: AnchorId(2 + n),
        saved_anchor_ids: (0..n).map(|i| AnchorId(2 + i)).collect(),
    }
}

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_snapshot");
    for n in [10u64, 100, 1000] {
        let snapshot = chain(n);
        let store = Store::open_in_memory().expect("in-memory store");
        group.bench_with_input(BenchmarkId::from_parameter(n), &snapshot, |b, s| {
            b.iter(|| store.save_snapshot(black_box(s)))
        });
    }
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let store = Store::open_in_memory().expect("in-memory store");
    store.save_snapshot(&chain(1000)).expect("save");
    c.bench_function("load_snapshot_1000", |b| b.iter(|| store.load_snapshot()));
}

criterion_group!(benches, bench_save, bench_load);
criterion_main!(benches);
