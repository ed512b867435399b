// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned by this crate.
//!
//! Errors produced by user-supplied processing functions are never wrapped:
//! they are handed back to the caller with their original type.

use std::io;
use thiserror::Error;

/// Error returned when starting a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// [`start()`](crate::WorkerPool::start) was called on a pool whose
    /// workers are already running.
    #[error("worker pool already started")]
    AlreadyStarted,
    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread #{id}")]
    Spawn {
        /// Index of the worker that couldn't be spawned.
        id: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Error returned by [`Container`](crate::Container) accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// The requested index is past the end of the container.
    #[error("index {index} out of range for container of length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Length of the container at the time of the access.
        len: usize,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(
            PoolError::AlreadyStarted.to_string(),
            "worker pool already started"
        );

        let err = PoolError::Spawn {
            id: 3,
            source: io::Error::new(io::ErrorKind::WouldBlock, "no more threads"),
        };
        assert_eq!(err.to_string(), "failed to spawn worker thread #3");
        assert_eq!(err.source().unwrap().to_string(), "no more threads");
    }

    #[test]
    fn test_container_error_display() {
        let err = ContainerError::IndexOutOfRange { index: 5, len: 2 };
        assert_eq!(
            err.to_string(),
            "index 5 out of range for container of length 2"
        );
    }
}
