// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[1_000, 10_000, 100_000];

/// Simulated per-item work, heavy enough to amortize a channel operation.
fn work(mut x: u64) -> u64 {
    for _ in 0..64 {
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    x
}

fn checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    for len in LENGTHS {
        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::checksum);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::checksum(bencher, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("fan_out@{num_threads}"), len),
                len,
                |bencher, len| taskline::checksum_fan_out(bencher, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("pool@{num_threads}"), len),
                len,
                |bencher, len| taskline::checksum_pool(bencher, num_threads, len),
            );
        }
    }
    group.finish();
}

fn transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");
    for len in LENGTHS {
        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::transform);
        group.bench_with_input(
            BenchmarkId::new("pipeline", len),
            len,
            taskline::transform_pipeline,
        );
    }
    group.finish();
}

/// Baseline benchmarks using serial iterators (without any multi-threading
/// involved).
mod serial {
    use super::work;
    use criterion::{black_box, Bencher};

    pub fn checksum(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        bencher.iter(|| {
            black_box(&input)
                .iter()
                .fold(0, |acc, &x| acc ^ work(x))
        });
    }

    pub fn transform(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        bencher.iter(|| {
            black_box(&input)
                .iter()
                .map(|&x| work(x))
                .map(|x| work(x ^ 1))
                .collect::<Vec<u64>>()
        });
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use super::work;
    use criterion::{black_box, Bencher};
    use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

    pub fn checksum(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| {
                black_box(&input)
                    .par_iter()
                    .map(|&x| work(x))
                    .reduce(|| 0, |a, b| a ^ b)
            })
        });
    }
}

/// Benchmarks using Taskline.
mod taskline {
    use super::work;
    use criterion::{black_box, Bencher};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use taskline::{
        fan_out, pipeline, CancellationToken, CpuPinningPolicy, Job, ThreadCount,
        WorkerPoolBuilder,
    };

    fn closed_input(len: usize) -> crossbeam_channel::Receiver<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for x in 0..len as u64 {
            tx.send(x).unwrap();
        }
        rx
    }

    pub fn checksum_fan_out(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let token = CancellationToken::new();
        bencher.iter(|| {
            let acc = Arc::new(AtomicU64::new(0));
            let result: Result<(), ()> = fan_out(
                &token,
                closed_input(*len),
                ThreadCount::try_from(num_threads).unwrap(),
                {
                    let acc = acc.clone();
                    move |x| {
                        acc.fetch_xor(work(x), Ordering::Relaxed);
                        Ok(())
                    }
                },
            );
            result.unwrap();
            black_box(acc.load(Ordering::Relaxed))
        });
    }

    pub fn checksum_pool(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let acc = Arc::new(AtomicU64::new(0));
        let mut pool = WorkerPoolBuilder {
            num_workers: ThreadCount::try_from(num_threads).unwrap(),
            cpu_pinning: CpuPinningPolicy::IfSupported,
        }
        .build({
            let acc = acc.clone();
            move |x: u64| {
                acc.fetch_xor(work(x), Ordering::Relaxed);
                Ok::<(), ()>(())
            }
        });
        pool.start(&CancellationToken::new()).unwrap();

        bencher.iter(|| {
            let (results_tx, results_rx) = crossbeam_channel::unbounded();
            std::thread::scope(|scope| {
                let pool = &pool;
                scope.spawn(move || {
                    for x in 0..*len as u64 {
                        pool.submit(Job::new(black_box(x), results_tx.clone()));
                    }
                });
                // Wait for all the jobs of this iteration.
                for result in results_rx.iter().take(*len) {
                    result.unwrap();
                }
            });
            black_box(acc.load(Ordering::Relaxed))
        });
        pool.stop();
    }

    pub fn transform_pipeline(bencher: &mut Bencher, len: &usize) {
        let token = CancellationToken::new();
        bencher.iter(|| {
            pipeline(&token, closed_input(*len), work, |x| work(x ^ 1))
                .iter()
                .collect::<Vec<u64>>()
        });
    }
}

criterion_group!(benches, checksum, transform);
criterion_main!(benches);
