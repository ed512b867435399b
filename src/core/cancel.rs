// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A one-shot cancellation signal shared between the caller and the worker
//! threads.

use crate::macros::log_debug;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use crossbeam_utils::CachePadded;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// A cloneable handle to a one-shot cancellation signal.
///
/// All clones share the same state, which transitions from active to
/// cancelled exactly once. Blocking operations observe the signal by
/// selecting on the [`done()`](Self::done) receiver, which becomes ready (as
/// disconnected) once the token is cancelled:
///
/// ```
/// # use crossbeam_channel::{bounded, select};
/// # use taskline::CancellationToken;
/// let token = CancellationToken::new();
/// let (_tx, rx) = bounded::<u32>(1);
///
/// token.cancel();
/// select! {
///     recv(token.done()) -> _ => println!("cancelled"),
///     recv(rx) -> _ => unreachable!(),
/// }
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    /// Whether the token has been cancelled.
    cancelled: CachePadded<AtomicBool>,
    /// Never used to send anything: dropping it disconnects `done`.
    trigger: Mutex<Option<Sender<Infallible>>>,
    /// Receiver that becomes ready once `trigger` is dropped.
    done: Receiver<Infallible>,
    /// Tokens derived from this one via [`CancellationToken::child()`].
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Self {
        let (trigger, done) = bounded(0);
        Self {
            cancelled: CachePadded::new(AtomicBool::new(false)),
            trigger: Mutex::new(Some(trigger)),
            done,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        drop(
            self.trigger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
        true
    }
}

impl CancellationToken {
    /// Creates a new active token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Creates a token that is cancelled whenever this one is cancelled, but
    /// that can also be cancelled on its own without affecting this one.
    ///
    /// ```
    /// # use taskline::CancellationToken;
    /// let parent = CancellationToken::new();
    /// let child = parent.child();
    ///
    /// child.cancel();
    /// assert!(!parent.is_cancelled());
    ///
    /// let other = parent.child();
    /// parent.cancel();
    /// assert!(other.is_cancelled());
    /// ```
    pub fn child(&self) -> Self {
        let child = Arc::new(Inner::new());
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // The parent sets its flag before draining its children, so a child
        // registered after the drain observes the flag here.
        if self.is_cancelled() {
            child.cancel();
        }
        Self { inner: child }
    }

    /// Cancels this token and all its children.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if the
    /// token was already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.cancel();
        if cancelled {
            log_debug!("Cancellation token cancelled");
        }
        cancelled
    }

    /// Returns whether this token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a receiver that never yields a value, and that becomes
    /// disconnected once this token is cancelled.
    ///
    /// This is meant to be used as an arm of [`crossbeam_channel::select!`].
    pub fn done(&self) -> &Receiver<Infallible> {
        &self.inner.done
    }

    /// Blocks until this token is cancelled.
    pub fn wait(&self) {
        // The channel never carries a value, so this only returns on
        // disconnection.
        let _ = self.inner.done.recv();
    }

    /// Blocks until this token is cancelled or the timeout elapses. Returns
    /// whether the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.done.recv_timeout(timeout) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
