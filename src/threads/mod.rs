// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker thread configuration: how many threads to spawn, and where to run
//! them.

use crate::macros::{log_debug, log_warn};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_getaffinity, sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::io;
use std::num::NonZeroUsize;
use std::thread::JoinHandle;

/// Number of worker threads to spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl ThreadCount {
    /// Resolves the number of threads to spawn.
    ///
    /// Falls back to a single thread if the available parallelism cannot be
    /// queried on this platform.
    pub fn count(self) -> NonZeroUsize {
        match self {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().unwrap_or_else(|_e| {
                    log_warn!("Getting the available parallelism failed, using 1 thread: {_e}");
                    NonZeroUsize::MIN
                })
            }
            ThreadCount::Count(count) => count,
        }
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

impl From<NonZeroUsize> for ThreadCount {
    fn from(count: NonZeroUsize) -> Self {
        ThreadCount::Count(count)
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    #[default]
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), starting the workers will panic.
    Always,
}

impl CpuPinningPolicy {
    /// Chooses a CPU for each of `num_workers` threads, among the CPUs that
    /// the calling thread is allowed to run on. Workers are assigned to these
    /// CPUs in a round-robin fashion.
    ///
    /// This runs before any thread gets spawned, so that an unsupported
    /// [`Always`](Self::Always) policy is reported on the caller's thread.
    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    pub(crate) fn assign_cpus(self, num_workers: usize) -> Vec<Option<usize>> {
        let allowed = || -> nix::Result<Vec<usize>> {
            let cpu_set = sched_getaffinity(Pid::from_raw(0))?;
            let mut cpus = Vec::new();
            for cpu in 0..CpuSet::count() {
                if cpu_set.is_set(cpu)? {
                    cpus.push(cpu);
                }
            }
            Ok(cpus)
        };
        let cpus = match self {
            CpuPinningPolicy::No => return vec![None; num_workers],
            CpuPinningPolicy::IfSupported => match allowed() {
                Ok(cpus) if !cpus.is_empty() => cpus,
                Ok(_) => {
                    log_warn!("No CPU is available to pin worker threads to");
                    return vec![None; num_workers];
                }
                Err(_e) => {
                    log_warn!("Failed to get the CPU affinity of the current thread: {_e}");
                    return vec![None; num_workers];
                }
            },
            CpuPinningPolicy::Always => match allowed() {
                Ok(cpus) if !cpus.is_empty() => cpus,
                Ok(_) => panic!("No CPU is available to pin worker threads to"),
                Err(e) => panic!("Failed to get the CPU affinity of the current thread: {e}"),
            },
        };
        log_debug!("Pinning {num_workers} workers to CPUs {cpus:?}");
        (0..num_workers)
            .map(|id| Some(cpus[id % cpus.len()]))
            .collect()
    }

    /// Chooses a CPU for each of `num_workers` threads.
    ///
    /// This runs before any thread gets spawned, so that an unsupported
    /// [`Always`](Self::Always) policy is reported on the caller's thread.
    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    pub(crate) fn assign_cpus(self, num_workers: usize) -> Vec<Option<usize>> {
        match self {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }
        vec![None; num_workers]
    }

    /// Pins the calling thread to the CPU chosen by
    /// [`assign_cpus()`](Self::assign_cpus), according to this policy.
    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    pub(crate) fn pin_current_thread(self, id: usize, cpu: Option<usize>) {
        let Some(cpu) = cpu else {
            return;
        };
        let pin = || -> nix::Result<()> {
            let mut cpu_set = CpuSet::new();
            cpu_set.set(cpu)?;
            sched_setaffinity(Pid::from_raw(0), &cpu_set)
        };
        match self {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => match pin() {
                Ok(()) => log_debug!("Pinned worker #{id} to CPU #{cpu}"),
                Err(_e) => log_warn!("Failed to set CPU affinity for worker #{id}: {_e}"),
            },
            CpuPinningPolicy::Always => match pin() {
                Ok(()) => log_debug!("Pinned worker #{id} to CPU #{cpu}"),
                Err(e) => panic!("Failed to set CPU affinity for worker #{id}: {e}"),
            },
        }
    }

    /// Pins the calling thread to the CPU chosen by
    /// [`assign_cpus()`](Self::assign_cpus), according to this policy.
    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    pub(crate) fn pin_current_thread(self, _id: usize, _cpu: Option<usize>) {}
}

/// Spawns a named worker thread.
pub(crate) fn spawn_named<F>(name: String, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name).spawn(f)
}

/// Spawns a named worker thread whose handle is never joined: the thread
/// finishes on its own once its channels are closed or the work is cancelled.
///
/// # Panics
///
/// Panics if the operating system fails to create the thread, like
/// [`std::thread::spawn()`].
pub(crate) fn spawn_detached<F>(name: String, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = spawn_named(name.clone(), f) {
        panic!("Failed to spawn thread {name}: {e}");
    }
    log_debug!("Spawned thread {name}");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_thread_count_try_from_usize() {
        assert!(ThreadCount::try_from(0).is_err());
        assert_eq!(
            ThreadCount::try_from(1),
            Ok(ThreadCount::Count(NonZeroUsize::try_from(1).unwrap()))
        );
    }

    #[test]
    fn test_thread_count_resolves() {
        assert_eq!(
            ThreadCount::try_from(3).unwrap().count(),
            NonZeroUsize::try_from(3).unwrap()
        );
        assert_eq!(
            ThreadCount::AvailableParallelism.count(),
            std::thread::available_parallelism().unwrap()
        );
    }

    #[test]
    fn test_thread_count_from_non_zero() {
        let count = NonZeroUsize::try_from(7).unwrap();
        assert_eq!(ThreadCount::from(count), ThreadCount::Count(count));
    }

    #[test]
    fn test_spawn_named_sets_thread_name() {
        let handle = spawn_named("taskline-test".to_owned(), || {
            assert_eq!(std::thread::current().name(), Some("taskline-test"));
        })
        .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_cpu_pinning_no_is_noop() {
        assert_eq!(CpuPinningPolicy::No.assign_cpus(3), [None; 3]);
        CpuPinningPolicy::No.pin_current_thread(0, None);
    }

    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[test]
    fn test_assign_cpus_within_affinity() {
        let allowed = sched_getaffinity(Pid::from_raw(0)).unwrap();
        let num_allowed = (0..CpuSet::count())
            .filter(|&cpu| allowed.is_set(cpu).unwrap())
            .count();

        // More workers than CPUs, so that some CPUs are assigned twice.
        let num_workers = num_allowed * 2 + 1;
        let cpus = CpuPinningPolicy::Always.assign_cpus(num_workers);
        assert_eq!(cpus.len(), num_workers);
        for cpu in &cpus {
            assert!(allowed.is_set(cpu.unwrap()).unwrap());
        }
        // Round robin over the allowed CPUs.
        assert_eq!(cpus[0], cpus[num_allowed]);
        let distinct = cpus[..num_allowed]
            .iter()
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(distinct.len(), num_allowed);
    }

    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[test]
    fn test_pin_to_assigned_cpu() {
        let cpus = CpuPinningPolicy::Always.assign_cpus(1);
        std::thread::spawn(move || {
            CpuPinningPolicy::Always.pin_current_thread(0, cpus[0]);
            let pinned = sched_getaffinity(Pid::from_raw(0)).unwrap();
            for cpu in 0..CpuSet::count() {
                assert_eq!(pinned.is_set(cpu).unwrap(), Some(cpu) == cpus[0]);
            }
        })
        .join()
        .unwrap();
    }

    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    #[test]
    fn test_assign_cpus_if_supported_falls_back() {
        assert_eq!(CpuPinningPolicy::IfSupported.assign_cpus(2), [None; 2]);
    }
}
