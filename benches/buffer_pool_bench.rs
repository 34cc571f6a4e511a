// Buffer pool performance benchmarks: slab reserve/free cycles, write/read
// throughput, and concurrent access across multiple targets.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hermes::buffer_pool::BufferPool;
use hermes::config::TargetConfig;
use hermes::target::DeviceKind;
use std::sync::Arc;

fn target_config(name: &str, bandwidth: f64, capacity: u64) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        kind: DeviceKind::Ram,
        path: None,
        capacity,
        bandwidth,
        latency_us: 5.0,
        slab_sizes: vec![4096, 64 * 1024, 1024 * 1024],
    }
}

fn bench_reserve_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_free");

    for slab_size in [4096u64, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(slab_size), &slab_size, |b, &slab_size| {
            let pool = BufferPool::new(1, &[target_config("ram0", 10000.0, 1 << 30)]).unwrap();
            let target = pool.targets()[0].clone();
            b.iter(|| {
                let bufs = target.reserve(black_box(slab_size)).unwrap();
                for buf in bufs {
                    target.free(buf);
                }
            });
        });
    }

    group.finish();
}

fn bench_write_read(c: &mut Criterion) {
    let pool = BufferPool::new(1, &[target_config("ram0", 10000.0, 1 << 30)]).unwrap();
    let target = pool.targets()[0].clone();
    let payload = vec![0xabu8; 4096];

    c.bench_function("write_then_read_4k", |b| {
        b.iter(|| {
            let buf = target.reserve(4096).unwrap().remove(0);
            target.write(buf, black_box(&payload), 0).unwrap();
            let out = target.read(buf, 0, 4096).unwrap();
            black_box(&out);
            target.free(buf);
        });
    });
}

fn bench_targets_by_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("targets_by_score_desc");

    for num_targets in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(num_targets), &num_targets, |b, &num_targets| {
            let configs: Vec<_> = (0..num_targets)
                .map(|i| target_config(&format!("t{i}"), 1000.0 + i as f64 * 137.0, 1 << 20))
                .collect();
            let pool = BufferPool::new(1, &configs).unwrap();
            b.iter(|| {
                black_box(pool.targets_by_score_desc());
            });
        });
    }

    group.finish();
}

fn bench_concurrent_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reserve");

    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_threads), &num_threads, |b, &num_threads| {
            let pool =
                Arc::new(BufferPool::new(1, &[target_config("ram0", 10000.0, 1 << 30)]).unwrap());

            b.iter(|| {
                let handles: Vec<_> = (0..num_threads)
                    .map(|_| {
                        let pool = pool.clone();
                        std::thread::spawn(move || {
                            let target = pool.targets()[0].clone();
                            for _ in 0..20 {
                                let buf = target.reserve(4096).unwrap().remove(0);
                                black_box(&buf);
                                target.free(buf);
                            }
                        })
                    })
                    .collect();

                for handle in handles {
                    handle.join().ok();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_free,
    bench_write_read,
    bench_targets_by_score,
    bench_concurrent_reserve
);
criterion_main!(benches);
