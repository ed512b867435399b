// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of concurrent tasks.
//!
//! Enable the `log` feature and set `RUST_LOG=debug` to follow the lifecycle
//! of the workers.

use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::collections::HashSet;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskline::{
    fan_out, pipeline, select_merge, CancellationToken, CpuPinningPolicy, Job, MergeEvent,
    MergeOptions, ThreadCount, WorkerPoolBuilder,
};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let num_workers = match cli.num_threads {
        Some(num_threads) => ThreadCount::Count(num_threads),
        None => ThreadCount::AvailableParallelism,
    };
    let failures = Arc::new(pick_failures(cli.input_size, cli.density));

    let token = CancellationToken::new();
    if let Some(ms) = cli.cancel_after_ms {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(ms));
            token.cancel();
        });
    }

    let start = Instant::now();
    match cli.scenario {
        Scenario::FanOut => {
            let result = fan_out(&token, input(cli.input_size), num_workers, move |x| {
                process(&failures, x)
            });
            println!("result = {result:?}");
        }
        Scenario::Pool => {
            let mut pool = WorkerPoolBuilder {
                num_workers,
                cpu_pinning: CpuPinningPolicy::IfSupported,
            }
            .build(move |x| process(&failures, x));
            if let Err(e) = pool.start(&token) {
                eprintln!("error: {e}");
                std::process::exit(1);
            }

            let (results_tx, results_rx) = crossbeam_channel::unbounded();
            // Submitting without blocking, so that the loop notices when the
            // workers stop after a cancellation.
            'submit: for x in input(cli.input_size) {
                let mut job = Job::new(x, results_tx.clone());
                loop {
                    match pool.try_submit(job) {
                        Ok(()) => break,
                        Err(_) if token.is_cancelled() => break 'submit,
                        Err(rejected) => {
                            job = rejected;
                            std::thread::yield_now();
                        }
                    }
                }
            }
            drop(results_tx);
            let stats = pool.stop();
            let failed = results_rx.iter().filter(Result::is_err).count();
            println!("stats = {stats:?}, {failed} failure(s) received");
        }
        Scenario::Pipeline => {
            let output = pipeline(
                &token,
                input(cli.input_size),
                move |x| (x, process(&failures, x).is_ok()),
                |(x, ok): (u64, bool)| if ok { x } else { 0 },
            );
            let sum = output.iter().sum::<u64>();
            println!("sum = {sum}");
        }
        Scenario::Merge => {
            let half = cli.input_size / 2;
            let mut counts = [0usize; 3];
            let outcome = select_merge(
                &token,
                input(half),
                input(cli.input_size - half),
                MergeOptions {
                    timeout: Duration::from_millis(cli.timeout_ms),
                    tick: Some(Duration::from_millis(100)),
                },
                |event| match event {
                    MergeEvent::Tick => counts[0] += 1,
                    MergeEvent::First(_) => counts[1] += 1,
                    MergeEvent::Second(_) => counts[2] += 1,
                },
            );
            println!(
                "outcome = {outcome:?}, {} tick(s), {} + {} item(s)",
                counts[0], counts[1], counts[2]
            );
        }
    }
    println!("elapsed = {:?}", start.elapsed());
}

/// Returns a closed stream of the integers in `0..input_size`.
fn input(input_size: u64) -> Receiver<u64> {
    let (tx, rx) = crossbeam_channel::unbounded();
    for x in 0..input_size {
        // The receiver is still alive.
        tx.send(x).unwrap();
    }
    rx
}

/// Simulated work, failing on the selected items.
fn process(failures: &HashSet<u64>, x: u64) -> Result<(), String> {
    let mut h = black_box(x);
    for _ in 0..64 {
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    black_box(h);
    if failures.contains(&x) {
        Err(format!("item {x} failed"))
    } else {
        Ok(())
    }
}

/// Selects `density` items out of `input_size` that fail when processed. The
/// set follows a uniform distribution, but is fixed by a constant-time seed for
/// reproducibility.
fn pick_failures(input_size: u64, density: usize) -> HashSet<u64> {
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let density = density.min(input_size as usize);
    index::sample(&mut rng, input_size as usize, density)
        .into_iter()
        .map(|i| i as u64)
        .collect()
}

/// CLI tool to run examples of concurrent tasks.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Scenario to run.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input.
    #[arg(long, default_value_t = 100_000)]
    input_size: u64,

    /// Number of items whose processing fails.
    #[arg(long, default_value_t = 0)]
    density: usize,

    /// Cancel all the workers after this many milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Timeout of the merge scenario, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Dispatch the input to workers, stopping at the first error.
    FanOut,
    /// Submit every item as a job to a worker pool.
    Pool,
    /// Run the input through a two-stage pipeline.
    Pipeline,
    /// Merge two halves of the input.
    Merge,
}
