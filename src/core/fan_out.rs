// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Distribution of a single input stream across concurrent workers.

use super::cancel::CancellationToken;
use super::panics::{PanicCounter, PanicNotifier};
use crate::macros::{log_debug, log_trace};
use crate::threads::{spawn_detached, ThreadCount};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;

/// Processes every item of `input` on `num_workers` concurrent worker threads,
/// returning the first error reported by `process`.
///
/// Each worker loops until the token is cancelled or `input` is disconnected
/// and drained. A worker whose call to `process` fails reports the error and
/// exits, but its siblings are **not** stopped: they keep consuming `input`
/// until it is exhausted or the token is cancelled, possibly after this
/// function has returned.
///
/// This function blocks until either an error is reported, or all the workers
/// have exited without error (in which case it returns `Ok(())`). When several
/// workers fail, the returned error is the first one received, which isn't
/// necessarily the first one in time.
///
/// A call to `process` that panics ends its worker like an error does. Once
/// all the workers have exited, the panic is re-raised on the calling thread
/// instead of returning `Ok(())`, since some items may have been skipped.
///
/// ```
/// # use taskline::{fan_out, CancellationToken, ThreadCount};
/// # use std::sync::atomic::{AtomicU64, Ordering};
/// # use std::sync::Arc;
/// let (tx, rx) = crossbeam_channel::unbounded();
/// for i in 1..=10 {
///     tx.send(i).unwrap();
/// }
/// drop(tx);
///
/// let sum = Arc::new(AtomicU64::new(0));
/// let result: Result<(), String> = fan_out(
///     &CancellationToken::new(),
///     rx,
///     ThreadCount::try_from(4).unwrap(),
///     {
///         let sum = sum.clone();
///         move |x| {
///             sum.fetch_add(x, Ordering::Relaxed);
///             Ok(())
///         }
///     },
/// );
/// assert!(result.is_ok());
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
///
/// # Panics
///
/// Panics if a worker thread cannot be spawned, or if a worker thread
/// panicked and no error was reported.
pub fn fan_out<T, E, F>(
    token: &CancellationToken,
    input: Receiver<T>,
    num_workers: ThreadCount,
    process: F,
) -> Result<(), E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
{
    let num_workers: usize = num_workers.count().into();
    let process = Arc::new(process);
    let panics = Arc::new(PanicCounter::default());
    // Each worker reports at most one error, so sending never blocks.
    let (errors_tx, errors_rx) = bounded(num_workers);

    for id in 0..num_workers {
        let worker = FanOutWorker {
            id,
            token: token.clone(),
            input: input.clone(),
            process: process.clone(),
            errors: errors_tx.clone(),
            panics: panics.clone(),
        };
        spawn_detached(format!("fan-out-worker-{id}"), move || worker.run());
    }
    drop(errors_tx);
    log_debug!("[fan-out] Spawned {num_workers} workers");

    // The error channel disconnects once every worker has exited and dropped
    // its sender.
    match errors_rx.recv() {
        Ok(err) => {
            log_debug!("[fan-out] A worker reported an error");
            Err(err)
        }
        Err(_) => {
            panics.propagate("fan-out worker(s)");
            log_debug!("[fan-out] All workers exited without error");
            Ok(())
        }
    }
}

/// Context object owned by a fan-out worker thread.
struct FanOutWorker<T, E, F> {
    /// Worker index.
    id: usize,
    token: CancellationToken,
    input: Receiver<T>,
    process: Arc<F>,
    /// Channel to report this worker's error, if any.
    errors: Sender<E>,
    panics: Arc<PanicCounter>,
}

impl<T, E, F> FanOutWorker<T, E, F>
where
    F: Fn(T) -> Result<(), E>,
{
    /// Main function run by this thread.
    fn run(self) {
        // Dropped before `self.errors` when unwinding.
        let _notifier = PanicNotifier::new(self.panics.clone(), "fan-out worker", self.id);
        loop {
            if self.token.is_cancelled() {
                log_debug!("[fan-out worker {}] Received cancellation", self.id);
                return;
            }
            select! {
                recv(self.token.done()) -> _ => {
                    log_debug!("[fan-out worker {}] Received cancellation", self.id);
                    return;
                }
                recv(self.input) -> item => {
                    let Ok(item) = item else {
                        log_debug!("[fan-out worker {}] Input exhausted", self.id);
                        return;
                    };
                    log_trace!("[fan-out worker {}] Processing an item", self.id);
                    if let Err(err) = (self.process)(item) {
                        log_debug!("[fan-out worker {}] Processing failed, exiting", self.id);
                        // The caller may have returned already after another error.
                        let _ = self.errors.send(err);
                        return;
                    }
                }
            }
        }
    }
}
