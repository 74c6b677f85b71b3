//! Block-cache bookkeeping throughput: the per-miss insert path and the
//! per-dispatch lookup path, plus range-invalidation over a populated
//! cache. These are the operations that sit between every cache miss and
//! the first executed instruction of the new block.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dynarm_runtime::{cache::PatchSiteAbs, BlockCache, BlockDescriptor};

fn desc(i: u64) -> BlockDescriptor {
    BlockDescriptor {
        entrypoint: 0x10_0000 + i * 64,
        byte_len: 64,
    }
}

fn populated(n: u64) -> BlockCache {
    let mut cache = BlockCache::new();
    for i in 0..n {
        cache.insert(i, desc(i), (i * 4, i * 4 + 4));
        cache.add_patch_site(
            i.wrapping_add(1) % n,
            PatchSiteAbs {
                addr: 0x10_0000 + i * 64 + 32,
                kind: dynarm_backend::PatchKind::Jg,
                fallback: 0x10_0000 + i * 64 + 38,
                owner: i,
            },
        );
    }
    cache
}

fn bench_lookup(c: &mut Criterion) {
    let cache = populated(4096);
    c.bench_function("block_cache_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 4096;
            black_box(cache.get(black_box(i)));
        })
    });
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("block_cache_insert_4096", |b| {
        b.iter(|| black_box(populated(4096)))
    });
}

fn bench_invalidate_range(c: &mut Criterion) {
    c.bench_function("range_query_over_4096_blocks", |b| {
        let cache = populated(4096);
        b.iter(|| black_box(cache.blocks_overlapping(black_box(1024), black_box(1060))))
    });
}

criterion_group!(benches, bench_lookup, bench_insert, bench_invalidate_range);
criterion_main!(benches);
