// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: cancellation, worker threads and stream combinators.

mod cancel;
mod fan_out;
mod merge;
mod panics;
mod pipeline;
mod stream;
mod worker_pool;

pub use cancel::CancellationToken;
pub use fan_out::fan_out;
pub use merge::{select_merge, MergeEvent, MergeOptions, MergeOutcome};
pub use pipeline::{pipeline, stage};
pub use stream::{IntoIter, Iter, Stream};
pub use worker_pool::{Job, PoolStats, WorkerPool, WorkerPoolBuilder};
