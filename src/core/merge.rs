// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Multiplexing of two streams with cancellation, a timeout and a ticker.

use super::cancel::CancellationToken;
use crate::macros::{log_debug, log_trace};
use crossbeam_channel::{after, never, select, tick, Receiver};
use std::time::Duration;

/// Options for [`select_merge()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOptions {
    /// Overall time after which merging stops.
    pub timeout: Duration,
    /// Period of the [`MergeEvent::Tick`] events, or [`None`] to disable them.
    pub tick: Option<Duration>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            tick: Some(Duration::from_secs(1)),
        }
    }
}

/// An event observed by [`select_merge()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeEvent<T> {
    /// The ticker fired.
    Tick,
    /// An item was received from the first stream.
    First(T),
    /// An item was received from the second stream.
    Second(T),
}

/// The reason why [`select_merge()`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Both streams were disconnected and drained.
    Exhausted,
    /// The token was cancelled.
    Cancelled,
    /// The timeout elapsed.
    TimedOut,
}

/// Receives from two streams until both are exhausted, the token is
/// cancelled, or the timeout elapses, passing every received item and tick to
/// `on_event`.
///
/// All sources are selected with equal weight, so a busy stream doesn't
/// starve the other one, nor delay the observation of cancellation or
/// timeout by more than one event.
///
/// ```
/// # use taskline::{select_merge, CancellationToken, MergeEvent, MergeOptions, MergeOutcome};
/// let (tx1, rx1) = crossbeam_channel::unbounded();
/// let (tx2, rx2) = crossbeam_channel::unbounded();
/// tx1.send(1).unwrap();
/// tx2.send(2).unwrap();
/// drop((tx1, tx2));
///
/// let mut sum = 0;
/// let outcome = select_merge(
///     &CancellationToken::new(),
///     rx1,
///     rx2,
///     MergeOptions::default(),
///     |event| match event {
///         MergeEvent::First(x) | MergeEvent::Second(x) => sum += x,
///         MergeEvent::Tick => (),
///     },
/// );
/// assert_eq!(outcome, MergeOutcome::Exhausted);
/// assert_eq!(sum, 3);
/// ```
pub fn select_merge<T>(
    token: &CancellationToken,
    first: Receiver<T>,
    second: Receiver<T>,
    options: MergeOptions,
    mut on_event: impl FnMut(MergeEvent<T>),
) -> MergeOutcome {
    let deadline = after(options.timeout);
    let ticker = match options.tick {
        Some(period) => tick(period),
        None => never(),
    };

    // A disconnected stream is swapped for one that is never ready.
    let mut first = Some(first);
    let mut second = Some(second);
    let idle: Receiver<T> = never();

    loop {
        if first.is_none() && second.is_none() {
            log_debug!("[merge] Both streams exhausted");
            return MergeOutcome::Exhausted;
        }
        let first_rx = first.as_ref().unwrap_or(&idle);
        let second_rx = second.as_ref().unwrap_or(&idle);

        let (first_closed, second_closed) = select! {
            recv(token.done()) -> _ => {
                log_debug!("[merge] Received cancellation");
                return MergeOutcome::Cancelled;
            }
            recv(deadline) -> _ => {
                log_debug!("[merge] Timed out after {:?}", options.timeout);
                return MergeOutcome::TimedOut;
            }
            recv(ticker) -> _ => {
                log_trace!("[merge] Tick");
                on_event(MergeEvent::Tick);
                (false, false)
            }
            recv(first_rx) -> item => match item {
                Ok(item) => {
                    on_event(MergeEvent::First(item));
                    (false, false)
                }
                Err(_) => (true, false),
            },
            recv(second_rx) -> item => match item {
                Ok(item) => {
                    on_event(MergeEvent::Second(item));
                    (false, false)
                }
                Err(_) => (false, true),
            },
        };

        if first_closed {
            log_debug!("[merge] First stream exhausted");
            first = None;
        }
        if second_closed {
            log_debug!("[merge] Second stream exhausted");
            second = None;
        }
    }
}
