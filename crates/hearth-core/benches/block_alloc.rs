//! Benchmarks for the block allocator

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hearth_core::alloc::{AllocatorConfig, BlockAllocator, MemoryBlock};

fn sizes(count: usize) -> Vec<usize> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            64 + (state % (64 * 1024)) as usize
        })
        .collect()
}

fn bench_alloc_free_fifo(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_alloc_fifo");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count as u64));
        let sizes = sizes(count);

        group.bench_with_input(BenchmarkId::from_parameter(count), &sizes, |b, sizes| {
            b.iter(|| {
                let mut alloc = BlockAllocator::new(AllocatorConfig::default());
                let blocks: Vec<MemoryBlock> = sizes.iter().map(|&s| alloc.alloc(black_box(s))).collect();
                for block in blocks {
                    alloc.free(block);
                }
                alloc
            });
        });
    }

    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_alloc_churn");

    for count in [1000, 10000] {
        group.throughput(Throughput::Elements(count as u64));
        let sizes = sizes(count);

        group.bench_with_input(BenchmarkId::from_parameter(count), &sizes, |b, sizes| {
            b.iter_batched(
                || BlockAllocator::new(AllocatorConfig::default()),
                |mut alloc| {
                    let mut live: Vec<MemoryBlock> = Vec::with_capacity(64);
                    for (i, &size) in sizes.iter().enumerate() {
                        live.push(alloc.alloc(size));
                        if live.len() == 64 {
                            // Free every other block so the free tree sees fragmentation.
                            let mut keep = Vec::with_capacity(32);
                            for (j, block) in live.drain(..).enumerate() {
                                if (i + j) % 2 == 0 {
                                    alloc.free(block);
                                } else {
                                    keep.push(block);
                                }
                            }
                            live = keep;
                        }
                    }
                    for block in live {
                        alloc.free(block);
                    }
                    alloc
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_alloc_free_fifo, bench_churn);
criterion_main!(benches);
