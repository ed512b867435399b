// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ordered transformation stages chained through rendezvous channels.

use super::cancel::CancellationToken;
use super::panics::{PanicCounter, PanicNotifier};
use super::stream::Stream;
use crate::macros::{log_debug, log_trace};
use crate::threads::spawn_detached;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;

/// Chains two transformation stages, returning a stream of
/// `stage2(stage1(x))` for each item `x` of `input`, in the same order.
///
/// This returns immediately: each stage runs on its own thread, connected to
/// the other by a zero-capacity relay. Once `input` is disconnected and
/// drained, the first stage closes the relay, and the second stage then closes
/// the output.
///
/// Cancelling the token stops both stages at their next blocking point. The
/// output is then closed without yielding the remaining items, so consumers
/// may either iterate until disconnection or select on the token themselves.
///
/// If a stage panics, the output is closed early and the panic is re-raised
/// by the [`Stream`] once the consumer observes the disconnection.
///
/// ```
/// # use taskline::{pipeline, CancellationToken};
/// let (tx, rx) = crossbeam_channel::unbounded();
/// for x in [1, 2, 3] {
///     tx.send(x).unwrap();
/// }
/// drop(tx);
///
/// let output = pipeline(&CancellationToken::new(), rx, |x| x * 2, |x| x + 1);
/// assert_eq!(output.iter().collect::<Vec<_>>(), [3, 5, 7]);
/// ```
///
/// # Panics
///
/// Panics if a stage thread cannot be spawned.
pub fn pipeline<T, U, V>(
    token: &CancellationToken,
    input: Receiver<T>,
    stage1: impl FnMut(T) -> U + Send + 'static,
    stage2: impl FnMut(U) -> V + Send + 'static,
) -> Stream<V>
where
    T: Send + 'static,
    U: Send + 'static,
    V: Send + 'static,
{
    stage(token, input, stage1).stage(token, stage2)
}

/// Applies `f` to each item of `input` on a dedicated thread, returning the
/// stream of results in the same order.
///
/// The returned stream has zero capacity: each result is handed over directly
/// to the consumer. The stage stops when `input` is exhausted, when the token
/// is cancelled, or when the returned stream is dropped, and closes its output
/// in all cases.
///
/// Stages can be chained with [`Stream::stage()`] to build pipelines of any
/// length:
///
/// ```
/// # use taskline::{stage, CancellationToken};
/// let token = CancellationToken::new();
/// let (tx, rx) = crossbeam_channel::unbounded();
/// for word in ["a", "bb", "ccc"] {
///     tx.send(word).unwrap();
/// }
/// drop(tx);
///
/// let labels = stage(&token, rx, |s: &str| s.len())
///     .stage(&token, |n| n * n)
///     .stage(&token, |n| format!("#{n}"));
/// assert_eq!(labels.iter().collect::<Vec<_>>(), ["#1", "#4", "#9"]);
/// ```
///
/// # Panics
///
/// Panics if the stage thread cannot be spawned.
pub fn stage<I, O>(
    token: &CancellationToken,
    input: Receiver<I>,
    f: impl FnMut(I) -> O + Send + 'static,
) -> Stream<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    spawn_stage(token, input, Arc::new(PanicCounter::default()), f)
}

impl<T: Send + 'static> Stream<T> {
    /// Appends a stage applying `f` to each item of this stream, like
    /// [`stage()`].
    ///
    /// A panic in any stage of the resulting chain is re-raised by the last
    /// stream.
    pub fn stage<O: Send + 'static>(
        self,
        token: &CancellationToken,
        f: impl FnMut(T) -> O + Send + 'static,
    ) -> Stream<O> {
        let panics = self.panics().clone();
        spawn_stage(token, self.into_receiver(), panics, f)
    }
}

fn spawn_stage<I, O>(
    token: &CancellationToken,
    input: Receiver<I>,
    panics: Arc<PanicCounter>,
    f: impl FnMut(I) -> O + Send + 'static,
) -> Stream<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let (output_tx, output_rx) = bounded(0);
    let context = StageContext {
        token: token.clone(),
        input,
        output: output_tx,
        f,
        panics: panics.clone(),
    };
    spawn_detached("pipeline-stage".to_owned(), move || context.run());
    Stream::new(output_rx, panics)
}

/// Context object owned by a stage thread.
struct StageContext<I, O, F> {
    token: CancellationToken,
    input: Receiver<I>,
    /// Sole producer of the output: dropping it closes the output.
    output: Sender<O>,
    /// Transformation applied to each item.
    f: F,
    panics: Arc<PanicCounter>,
}

impl<I, O, F: FnMut(I) -> O> StageContext<I, O, F> {
    /// Main function run by this thread.
    fn run(mut self) {
        // Dropped before `self.output` when unwinding.
        let _notifier = PanicNotifier::new(self.panics.clone(), "stage", 0);
        loop {
            if self.token.is_cancelled() {
                log_debug!("[stage] Received cancellation");
                return;
            }
            let item = select! {
                recv(self.token.done()) -> _ => {
                    log_debug!("[stage] Received cancellation");
                    return;
                }
                recv(self.input) -> item => match item {
                    Ok(item) => item,
                    Err(_) => {
                        log_debug!("[stage] Input exhausted, closing the output");
                        return;
                    }
                },
            };

            log_trace!("[stage] Transforming an item");
            let value = (self.f)(item);
            select! {
                recv(self.token.done()) -> _ => {
                    log_debug!("[stage] Received cancellation while sending");
                    return;
                }
                send(self.output, value) -> res => {
                    if res.is_err() {
                        log_debug!("[stage] Output receiver dropped");
                        return;
                    }
                }
            }
        }
    }
}
