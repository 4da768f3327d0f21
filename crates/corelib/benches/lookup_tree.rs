use corelib::node::{ChunkId, NodeId};
use corelib::tree::{BackupPeers, LookupTree, RangeId, DEFAULT_ORDER};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const CREATOR: NodeId = NodeId(0x2500);

fn fragmented_tree(regions: u64) -> LookupTree {
    let mut tree = LookupTree::new(DEFAULT_ORDER, CREATOR);
    tree.init_range(RangeId::Local(1), BackupPeers::empty());
    for i in 0..regions {
        let start = i * 100;
        tree.migrate_range(
            ChunkId::new(CREATOR, start),
            ChunkId::new(CREATOR, start + 49),
            NodeId(0x3000 + (i % 16) as u16),
        );
    }
    tree
}

fn bench_primary_peer(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_primary_peer");
    for regions in [100u64, 10_000] {
        let tree = fragmented_tree(regions);
        group.bench_with_input(BenchmarkId::from_parameter(regions), &tree, |b, tree| {
            let mut lid = 0u64;
            b.iter(|| {
                lid = (lid + 7919) % (regions * 100);
                black_box(tree.get_primary_peer(ChunkId::new(CREATOR, lid)))
            })
        });
    }
    group.finish();
}

fn bench_migrate_range(c: &mut Criterion) {
    c.bench_function("migrate_range_10k_regions", |b| {
        let mut tree = fragmented_tree(10_000);
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            let start = i * 100 + 25;
            tree.migrate_range(
                ChunkId::new(CREATOR, start),
                ChunkId::new(CREATOR, start + 50),
                NodeId(0x4000),
            )
        })
    });
}

criterion_group!(benches, bench_primary_peer, bench_migrate_range);
criterion_main!(benches);
