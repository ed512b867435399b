// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

mod container;
mod core;
mod error;
mod macros;
mod threads;

pub use container::{map, Container, Counter};
pub use self::core::{
    fan_out, pipeline, select_merge, stage, CancellationToken, IntoIter, Iter, Job, MergeEvent,
    MergeOptions, MergeOutcome, PoolStats, Stream, WorkerPool, WorkerPoolBuilder,
};
pub use error::{ContainerError, PoolError};
pub use threads::{CpuPinningPolicy, ThreadCount};
