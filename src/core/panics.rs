// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Detection of panics in detached threads, so that they can be re-raised on
//! the thread consuming their output.

use crate::macros::log_error;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of threads that panicked, shared between these threads and the
/// consumer of their output.
#[derive(Debug, Default)]
pub(crate) struct PanicCounter {
    count: CachePadded<AtomicUsize>,
}

impl PanicCounter {
    /// Returns how many watched threads have panicked so far.
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Panics on the calling thread if any watched thread has panicked.
    pub(crate) fn propagate(&self, what: &str) {
        let count = self.count();
        if count != 0 {
            log_error!("{count} {what} panicked!");
            panic!("{count} {what} panicked!");
        }
    }
}

/// Object whose destructor records a panic of the thread owning it.
///
/// It must be dropped before the thread releases its output channel, so that
/// the consumer observes the panic no later than the disconnection.
pub(crate) struct PanicNotifier {
    /// Thread label, for logging.
    #[cfg(feature = "log")]
    label: &'static str,
    /// Thread index, for logging.
    #[cfg(feature = "log")]
    id: usize,
    counter: Arc<PanicCounter>,
}

impl PanicNotifier {
    #[cfg_attr(not(feature = "log"), allow(unused_variables))]
    pub(crate) fn new(counter: Arc<PanicCounter>, label: &'static str, id: usize) -> Self {
        Self {
            #[cfg(feature = "log")]
            label,
            #[cfg(feature = "log")]
            id,
            counter,
        }
    }
}

impl Drop for PanicNotifier {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log_error!(
                "[{} {}] Detected panic in this thread, notifying the consumer",
                self.label,
                self.id
            );
            self.counter.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_no_panic_is_not_recorded() {
        let counter = Arc::new(PanicCounter::default());
        std::thread::spawn({
            let counter = counter.clone();
            move || {
                let _notifier = PanicNotifier::new(counter, "test", 0);
            }
        })
        .join()
        .unwrap();
        assert_eq!(counter.count(), 0);
        counter.propagate("test thread(s)");
    }

    #[test]
    fn test_panic_is_recorded() {
        let counter = Arc::new(PanicCounter::default());
        for id in 0..3 {
            let result = std::thread::spawn({
                let counter = counter.clone();
                move || {
                    let _notifier = PanicNotifier::new(counter, "test", id);
                    panic!("arithmetic panic");
                }
            })
            .join();
            assert!(result.is_err());
        }
        assert_eq!(counter.count(), 3);
    }

    #[test]
    #[should_panic(expected = "2 test thread(s) panicked!")]
    fn test_propagate() {
        let counter = PanicCounter::default();
        counter.count.fetch_add(2, Ordering::SeqCst);
        counter.propagate("test thread(s)");
    }
}
