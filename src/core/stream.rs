// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Output of pipeline stages.

use super::panics::PanicCounter;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The receiving side of a [`stage()`](crate::stage) or
/// [`pipeline()`](crate::pipeline).
///
/// This behaves like a [`Receiver`], except that observing the disconnection
/// re-raises any panic of an upstream stage on the consumer's thread. A
/// panicking stage closes its output early, which would otherwise look like
/// the input being exhausted.
pub struct Stream<T> {
    receiver: Receiver<T>,
    /// Panics of all the stages feeding this stream.
    panics: Arc<PanicCounter>,
}

impl<T> Stream<T> {
    pub(crate) fn new(receiver: Receiver<T>, panics: Arc<PanicCounter>) -> Self {
        Self { receiver, panics }
    }

    pub(crate) fn panics(&self) -> &Arc<PanicCounter> {
        &self.panics
    }

    /// Blocks until an item is received or the stream is closed.
    ///
    /// # Panics
    ///
    /// Panics if the stream is closed because an upstream stage panicked.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv().inspect_err(|_| self.propagate_panics())
    }

    /// Blocks until an item is received, the stream is closed or the timeout
    /// elapses.
    ///
    /// # Panics
    ///
    /// Panics if the stream is closed because an upstream stage panicked.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout).inspect_err(|e| {
            if *e == RecvTimeoutError::Disconnected {
                self.propagate_panics();
            }
        })
    }

    /// Receives an item if one is ready, without blocking.
    ///
    /// # Panics
    ///
    /// Panics if the stream is closed because an upstream stage panicked.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv().inspect_err(|e| {
            if *e == TryRecvError::Disconnected {
                self.propagate_panics();
            }
        })
    }

    /// Returns a blocking iterator over the items, ending when the stream is
    /// closed.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { stream: self }
    }

    /// Returns the underlying receiver, to use in a
    /// [`select!`](crossbeam_channel::select) arm.
    ///
    /// Receiving from it directly bypasses panic detection: after observing a
    /// disconnection there, call [`recv()`](Self::recv) to re-raise a panic.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    /// Converts this stream into a plain receiver, giving up panic detection.
    pub fn into_receiver(self) -> Receiver<T> {
        self.receiver
    }

    fn propagate_panics(&self) {
        self.panics.propagate("pipeline stage(s)");
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("receiver", &self.receiver)
            .field("panics", &self.panics.count())
            .finish()
    }
}

/// Blocking iterator over a borrowed [`Stream`].
pub struct Iter<'a, T> {
    stream: &'a Stream<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.stream.recv().ok()
    }
}

/// Blocking iterator over an owned [`Stream`].
pub struct IntoIter<T> {
    stream: Stream<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.stream.recv().ok()
    }
}

impl<'a, T> IntoIterator for &'a Stream<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Stream<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { stream: self }
    }
}
