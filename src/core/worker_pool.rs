// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A long-lived pool of worker threads processing submitted jobs.

use super::cancel::CancellationToken;
use crate::error::PoolError;
use crate::macros::{log_debug, log_error, log_info, log_trace, log_warn};
use crate::threads::{spawn_named, CpuPinningPolicy, ThreadCount};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use crossbeam_utils::CachePadded;
use std::io;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work for a [`WorkerPool`]: an input paired with the channel on
/// which the outcome of processing it is sent.
///
/// The result channel must have a capacity of at least one: the worker sends
/// exactly one value on it and doesn't wait for the receiving side. If
/// processing the job panics, nothing is sent and the job's sender is dropped
/// instead.
pub struct Job<T, E> {
    /// Input to process.
    pub data: T,
    /// Channel receiving the outcome of processing [`data`](Self::data).
    pub result: Sender<Result<(), E>>,
}

impl<T, E> Job<T, E> {
    /// Creates a job reporting its outcome on the given channel.
    pub fn new(data: T, result: Sender<Result<(), E>>) -> Self {
        Self { data, result }
    }

    /// Creates a job together with a dedicated result channel of capacity one.
    pub fn with_result_channel(data: T) -> (Self, Receiver<Result<(), E>>) {
        let (result, receiver) = bounded(1);
        (Self { data, result }, receiver)
    }
}

/// A builder for [`WorkerPool`].
pub struct WorkerPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_workers: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl WorkerPoolBuilder {
    /// Creates a worker pool that runs `process` on every submitted job.
    ///
    /// The pool doesn't spawn any thread until it is
    /// [started](WorkerPool::start).
    ///
    /// ```
    /// # use taskline::{CancellationToken, CpuPinningPolicy, Job, ThreadCount, WorkerPoolBuilder};
    /// let mut pool = WorkerPoolBuilder {
    ///     num_workers: ThreadCount::try_from(2).unwrap(),
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// }
    /// .build(|x: i32| if x >= 0 { Ok(()) } else { Err(format!("negative: {x}")) });
    ///
    /// let token = CancellationToken::new();
    /// pool.start(&token).unwrap();
    ///
    /// let (job, result) = Job::with_result_channel(-3);
    /// pool.submit(job);
    /// assert_eq!(result.recv().unwrap(), Err("negative: -3".to_owned()));
    ///
    /// let stats = pool.stop();
    /// assert_eq!(stats.processed, 1);
    /// assert_eq!(stats.failed, 1);
    /// ```
    pub fn build<T, E, F>(&self, process: F) -> WorkerPool<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        WorkerPool::with_builder(self, Arc::new(process))
    }
}

/// Lifecycle state of a [`WorkerPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PoolState {
    /// No worker has been spawned yet.
    Created,
    /// The workers are running.
    Started,
    /// The intake is closed and the workers have been joined.
    Stopped,
}

/// Statistics about the jobs processed by a [`WorkerPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of jobs that have been processed.
    pub processed: usize,
    /// Number of processed jobs whose outcome was an error.
    pub failed: usize,
    /// Number of processed jobs whose processing panicked.
    pub panicked: usize,
}

/// Counters shared between the pool and its worker threads.
#[derive(Default)]
struct SharedCounters {
    processed: CachePadded<AtomicUsize>,
    failed: CachePadded<AtomicUsize>,
    panicked: CachePadded<AtomicUsize>,
}

impl SharedCounters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }
}

/// Function spawning a named thread.
type Spawner<'a> = dyn FnMut(String, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> + 'a;

/// Processing function shared by all the workers. This is a dynamic object to
/// avoid making the function type a parameter of the pool.
type ProcessFn<T, E> = dyn Fn(T) -> Result<(), E> + Send + Sync;

/// A pool of worker threads, processing [`Job`]s submitted through a bounded
/// intake queue.
///
/// The intake holds up to twice as many jobs as there are workers; beyond
/// that, [`submit()`](Self::submit) blocks until a worker picks up a job.
///
/// Processing errors don't stop a worker: they are reported on the job's own
/// result channel and the worker moves on to the next job. Workers only exit
/// when the intake is closed by [`stop()`](Self::stop), or when the
/// [`CancellationToken`] passed to [`start()`](Self::start) is cancelled. In
/// the latter case, queued jobs are abandoned and their result channels are
/// never written to, so callers waiting on a result should also select on the
/// token.
///
/// A panic while processing a job doesn't stop the worker either: the job's
/// result sender is dropped without a value, and the panic is re-raised by
/// [`stop()`](Self::stop) (or when dropping the pool) once all the workers
/// have been joined.
pub struct WorkerPool<T, E> {
    /// Number of worker threads to spawn.
    num_workers: NonZeroUsize,
    /// Policy to pin worker threads to CPUs.
    cpu_pinning: CpuPinningPolicy,
    /// Sending side of the intake. Dropping it closes the intake.
    jobs: Option<Sender<Job<T, E>>>,
    /// Receiving side of the intake, cloned into each worker.
    intake: Receiver<Job<T, E>>,
    /// Function run on each job's data.
    process: Arc<ProcessFn<T, E>>,
    /// Handles to all the worker threads in the pool.
    workers: Vec<WorkerThreadHandle>,
    counters: Arc<SharedCounters>,
    /// Number of worker threads that panicked outside of a job.
    worker_panics: usize,
    state: PoolState,
}

/// Handle to a worker thread in the pool.
struct WorkerThreadHandle {
    /// Worker index.
    id: usize,
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl<T, E> WorkerPool<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a pool of `num_workers` workers, running `process` on every
    /// submitted job, without CPU pinning.
    pub fn new<F>(num_workers: ThreadCount, process: F) -> Self
    where
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    {
        WorkerPoolBuilder {
            num_workers,
            cpu_pinning: CpuPinningPolicy::No,
        }
        .build(process)
    }

    fn with_builder(builder: &WorkerPoolBuilder, process: Arc<ProcessFn<T, E>>) -> Self {
        let num_workers = builder.num_workers.count();
        let capacity = num_workers.get().saturating_mul(2);
        let (jobs, intake) = bounded(capacity);
        Self {
            num_workers,
            cpu_pinning: builder.cpu_pinning,
            jobs: Some(jobs),
            intake,
            process,
            workers: Vec::new(),
            counters: Arc::new(SharedCounters::default()),
            worker_panics: 0,
            state: PoolState::Created,
        }
    }

    /// Returns the number of worker threads of this pool.
    pub fn num_workers(&self) -> NonZeroUsize {
        self.num_workers
    }

    /// Returns the statistics of the jobs processed so far.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Spawns the worker threads, which run until the intake is closed or the
    /// given token is cancelled.
    ///
    /// Jobs submitted before this call are queued and processed once the
    /// workers are running.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AlreadyStarted`] if the workers are already
    /// running, and [`PoolError::Spawn`] if a worker thread cannot be spawned.
    /// In the latter case, the workers spawned so far are stopped and joined
    /// before returning, and the pool is left as it was before the call: jobs
    /// still queued stay in the intake, and `start()` can be called again.
    ///
    /// # Panics
    ///
    /// Panics if the pool was configured with [`CpuPinningPolicy::Always`] and
    /// the workers cannot be pinned on this platform.
    pub fn start(&mut self, token: &CancellationToken) -> Result<(), PoolError> {
        self.start_with(token, &mut |name: String, f: Box<dyn FnOnce() + Send>| {
            spawn_named(name, f)
        })
    }

    fn start_with(
        &mut self,
        token: &CancellationToken,
        spawn: &mut Spawner<'_>,
    ) -> Result<(), PoolError> {
        if self.state != PoolState::Created {
            return Err(PoolError::AlreadyStarted);
        }
        let cpus = self.cpu_pinning.assign_cpus(self.num_workers.get());

        // Workers get their own token, so that a failed start can stop them
        // without cancelling the caller's token.
        let token = token.child();
        for (id, cpu) in cpus.into_iter().enumerate() {
            let context = WorkerContext {
                #[cfg(feature = "log")]
                id,
                token: token.clone(),
                intake: self.intake.clone(),
                process: self.process.clone(),
                counters: self.counters.clone(),
            };
            let cpu_pinning = self.cpu_pinning;
            let worker = Box::new(move || {
                cpu_pinning.pin_current_thread(id, cpu);
                context.run()
            });
            match spawn(format!("pool-worker-{id}"), worker) {
                Ok(handle) => self.workers.push(WorkerThreadHandle { id, handle }),
                Err(source) => {
                    log_error!("[pool] Failed to spawn worker #{id}: {source}");
                    token.cancel();
                    self.join_workers();
                    log_debug!("[pool] Stopped the {id} workers spawned so far");
                    return Err(PoolError::Spawn { id, source });
                }
            }
        }
        self.state = PoolState::Started;
        log_debug!("[pool] Spawned {} workers", self.num_workers);
        Ok(())
    }

    /// Enqueues a job, blocking while the intake is full.
    ///
    /// If the workers have exited after a cancellation, nothing drains the
    /// intake anymore and this blocks forever once it is full.
    pub fn submit(&self, job: Job<T, E>) {
        if let Some(jobs) = &self.jobs {
            // The pool keeps a receiver alive, so the intake can't be
            // disconnected while the pool exists.
            let _ = jobs.send(job);
        }
    }

    /// Enqueues a job if the intake has room for it, or hands it back
    /// otherwise.
    pub fn try_submit(&self, job: Job<T, E>) -> Result<(), Job<T, E>> {
        match &self.jobs {
            Some(jobs) => jobs.try_send(job).map_err(|e| match e {
                TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
            }),
            None => Err(job),
        }
    }

    /// Closes the intake and waits for all the workers to exit, returning the
    /// final statistics.
    ///
    /// Jobs already queued are still processed, unless the token passed to
    /// [`start()`](Self::start) is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if processing a job panicked, or if a worker thread panicked.
    pub fn stop(mut self) -> PoolStats {
        self.shutdown();
        self.counters.snapshot()
    }
}

impl<T, E> WorkerPool<T, E> {
    /// Closes the intake, joins all the worker threads, and re-raises any
    /// panic that occurred in them.
    fn shutdown(&mut self) {
        if self.state == PoolState::Stopped {
            return;
        }
        log_debug!("[pool] Closing the intake...");
        drop(self.jobs.take());

        log_debug!("[pool] Joining workers...");
        self.join_workers();
        self.state = PoolState::Stopped;

        let stats = self.counters.snapshot();
        log_info!(
            "[pool] Stopped after processing {} jobs ({} failed, {} panicked)",
            stats.processed,
            stats.failed,
            stats.panicked
        );

        // Don't panic again while unwinding, which would abort.
        if std::thread::panicking() {
            return;
        }
        if self.worker_panics != 0 {
            log_error!("[pool] {} worker thread(s) panicked!", self.worker_panics);
            panic!("{} worker thread(s) panicked!", self.worker_panics);
        }
        if stats.panicked != 0 {
            log_error!("[pool] {} job(s) panicked!", stats.panicked);
            panic!("{} job(s) panicked!", stats.panicked);
        }
    }

    /// Joins the worker threads spawned so far.
    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            let _id = worker.id;
            match worker.handle.join() {
                Ok(()) => log_debug!("[pool] Worker {_id} joined"),
                Err(_) => {
                    log_error!("[pool] Worker {_id} panicked");
                    self.worker_panics += 1;
                }
            }
        }
    }
}

impl<T, E> Drop for WorkerPool<T, E> {
    /// Closes the intake and joins all the threads in the pool.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Context object owned by a worker thread.
struct WorkerContext<T, E> {
    /// Worker index.
    #[cfg(feature = "log")]
    id: usize,
    token: CancellationToken,
    intake: Receiver<Job<T, E>>,
    process: Arc<ProcessFn<T, E>>,
    counters: Arc<SharedCounters>,
}

impl<T, E> WorkerContext<T, E> {
    /// Main function run by this thread.
    fn run(self) {
        loop {
            // Cancellation takes precedence over queued jobs.
            if self.token.is_cancelled() {
                log_debug!("[worker {}] Received cancellation", self.id);
                break;
            }
            let job = select! {
                recv(self.token.done()) -> _ => {
                    log_debug!("[worker {}] Received cancellation", self.id);
                    break;
                }
                recv(self.intake) -> job => match job {
                    Ok(job) => job,
                    Err(_) => {
                        log_debug!("[worker {}] Intake closed", self.id);
                        break;
                    }
                },
            };

            log_trace!("[worker {}] Processing a job", self.id);
            let Job { data, result: sender } = job;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.process)(data)));
            self.counters.processed.fetch_add(1, Ordering::SeqCst);
            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    log_error!("[worker {}] Processing a job panicked", self.id);
                    self.counters.panicked.fetch_add(1, Ordering::SeqCst);
                    // Dropping the sender tells the receiver that no result is coming.
                    continue;
                }
            };
            if result.is_err() {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            if sender.send(result).is_err() {
                log_warn!(
                    "[worker {}] The receiver of a job result was dropped",
                    self.id
                );
            }
        }
    }
}
