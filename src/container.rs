// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Collections that can be shared between threads, with their lock composed
//! alongside the data rather than exposed to callers.

use crate::error::ContainerError;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A growable collection of items, safe to share between threads.
///
/// Every accessor takes the internal lock for the duration of the call only,
/// so no guard ever escapes to the caller.
///
/// ```
/// # use taskline::{map, Container, ContainerError};
/// let names = Container::new();
/// names.add("alice".to_owned());
/// names.add("bob".to_owned());
///
/// let lengths = map(&names, |name| name.len());
/// assert_eq!(lengths.get(1), Ok(3));
/// assert_eq!(
///     lengths.get(2),
///     Err(ContainerError::IndexOutOfRange { index: 2, len: 2 })
/// );
/// ```
#[derive(Debug)]
pub struct Container<T> {
    items: RwLock<Vec<T>>,
}

impl<T> Container<T> {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }

    /// Appends an item.
    pub fn add(&self, item: T) {
        self.write().push(item);
    }

    /// Returns a copy of the item at the given index.
    pub fn get(&self, index: usize) -> Result<T, ContainerError>
    where
        T: Clone,
    {
        let items = self.read();
        items
            .get(index)
            .cloned()
            .ok_or(ContainerError::IndexOutOfRange {
                index,
                len: items.len(),
            })
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns whether the container holds no item.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns a copy of all the items, in insertion order.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.read().clone()
    }

    /// Consumes the container, returning its items.
    pub fn into_inner(self) -> Vec<T> {
        self.items
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // A panic while holding the lock can't leave the vector in a broken state:
    // each mutation is a single `push()`.
    fn read(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Container<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for Container<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }
}

impl<T> FromIterator<T> for Container<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<T>>())
    }
}

/// Creates a new container by applying `f` to every item of `container`, in
/// order.
///
/// The source container is locked for reading during the whole
/// transformation, so concurrent [`add()`](Container::add) calls wait until
/// it completes and the output is a consistent snapshot.
pub fn map<T, U>(container: &Container<T>, f: impl FnMut(&T) -> U) -> Container<U> {
    let items = container.read();
    Container::from(items.iter().map(f).collect::<Vec<U>>())
}

/// Per-key counters, safe to share between threads.
///
/// Each value is meant to be constructed by its owner and handed to the
/// threads that use it, typically behind an [`Arc`](std::sync::Arc), rather
/// than reached through a global.
///
/// ```
/// # use std::sync::Arc;
/// # use taskline::Counter;
/// let hits = Arc::new(Counter::new());
/// std::thread::scope(|scope| {
///     for _ in 0..4 {
///         let hits = hits.clone();
///         scope.spawn(move || {
///             hits.inc("home");
///         });
///     }
/// });
/// hits.inc("about");
///
/// assert_eq!(hits.get("home"), 4);
/// assert_eq!(hits.get("about"), 1);
/// assert_eq!(hits.get("contact"), 0);
/// ```
#[derive(Debug)]
pub struct Counter<K> {
    counts: RwLock<HashMap<K, usize>>,
}

impl<K: Eq + Hash> Counter<K> {
    /// Creates a counter where every key counts zero.
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Increments the count of the given key, returning its new value.
    pub fn inc(&self, key: K) -> usize {
        let mut counts = self.write();
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Returns the count of the given key, which is zero for a key that was
    /// never incremented.
    pub fn get<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key).copied().unwrap_or(0)
    }

    /// Returns the number of keys with a non-zero count.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns whether no key was ever incremented.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns a copy of all the non-zero counts.
    pub fn snapshot(&self) -> HashMap<K, usize>
    where
        K: Clone,
    {
        self.read().clone()
    }

    /// Consumes the counter, returning all the non-zero counts.
    pub fn into_inner(self) -> HashMap<K, usize> {
        self.counts
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Each mutation is a single increment, which can't be interrupted halfway.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, usize>> {
        self.counts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, usize>> {
        self.counts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: Eq + Hash> Default for Counter<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_get() {
        let container = Container::new();
        assert!(container.is_empty());

        container.add(1);
        container.add(2);
        assert_eq!(container.len(), 2);
        assert_eq!(container.get(0), Ok(1));
        assert_eq!(container.get(1), Ok(2));
    }

    #[test]
    fn test_get_out_of_range() {
        let container = Container::<u8>::new();
        assert_eq!(
            container.get(0),
            Err(ContainerError::IndexOutOfRange { index: 0, len: 0 })
        );

        container.add(42);
        assert_eq!(
            container.get(usize::MAX),
            Err(ContainerError::IndexOutOfRange {
                index: usize::MAX,
                len: 1
            })
        );
    }

    #[test]
    fn test_map_preserves_order() {
        let container = (0..100).collect::<Container<u32>>();
        let mapped = map(&container, |x| format!("{}", x * 3));
        assert_eq!(mapped.len(), 100);
        assert_eq!(
            mapped.into_inner(),
            (0..100).map(|x| format!("{}", x * 3)).collect::<Vec<_>>()
        );
        // The source is left untouched.
        assert_eq!(container.to_vec(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_empty() {
        let container = Container::<u32>::default();
        assert!(map(&container, |x| *x).is_empty());
    }

    #[test]
    fn test_concurrent_adds() {
        let container = Arc::new(Container::new());
        std::thread::scope(|scope| {
            for t in 0..4 {
                let container = container.clone();
                scope.spawn(move || {
                    for i in 0..250 {
                        container.add(t * 1_000 + i);
                    }
                });
            }
        });
        assert_eq!(container.len(), 1_000);

        let mut items = container.to_vec();
        items.sort_unstable();
        let mut expected = (0..4)
            .flat_map(|t| (0..250).map(move |i| t * 1_000 + i))
            .collect::<Vec<_>>();
        expected.sort_unstable();
        assert_eq!(items, expected);
    }

    #[test]
    fn test_concurrent_map_and_add() {
        let container = Arc::new((0..1_000).collect::<Container<u64>>());
        std::thread::scope(|scope| {
            let writer = container.clone();
            scope.spawn(move || {
                for i in 0..1_000 {
                    writer.add(1_000 + i);
                }
            });

            let mapped = map(&*container, |x| x * 2);
            // A snapshot is consistent: some prefix of the final sequence.
            let mapped = mapped.into_inner();
            assert!(mapped.len() >= 1_000);
            for (i, x) in mapped.iter().enumerate() {
                assert_eq!(*x, i as u64 * 2);
            }
        });
        assert_eq!(container.len(), 2_000);
    }

    #[test]
    fn test_counter_inc_and_get() {
        let counter = Counter::new();
        assert!(counter.is_empty());
        assert_eq!(counter.get("a"), 0);

        assert_eq!(counter.inc("a"), 1);
        assert_eq!(counter.inc("a"), 2);
        assert_eq!(counter.inc("b"), 1);
        assert_eq!(counter.get("a"), 2);
        assert_eq!(counter.get("b"), 1);
        assert_eq!(counter.len(), 2);
    }

    #[test]
    fn test_counter_borrowed_lookup() {
        let counter = Counter::<String>::default();
        counter.inc("key".to_owned());
        assert_eq!(counter.get("key"), 1);
        assert_eq!(
            counter.snapshot(),
            [("key".to_owned(), 1)].into_iter().collect::<HashMap<_, _>>()
        );
    }

    #[test]
    fn test_counter_concurrent_inc() {
        let counter = Arc::new(Counter::new());
        std::thread::scope(|scope| {
            for t in 0..4 {
                let counter = counter.clone();
                scope.spawn(move || {
                    for i in 0..1_000 {
                        counter.inc(i % 10);
                        counter.inc(100 + t);
                    }
                });
            }
        });
        for key in 0..10 {
            assert_eq!(counter.get(&key), 400);
        }
        for t in 0..4 {
            assert_eq!(counter.get(&(100 + t)), 1_000);
        }

        let counts = Arc::into_inner(counter).unwrap().into_inner();
        assert_eq!(counts.len(), 14);
        assert_eq!(counts.values().sum::<usize>(), 8_000);
    }

    #[test]
    fn test_counter_recovers_from_poisoning() {
        let counter = Counter::new();
        counter.inc(1u8);
        std::thread::scope(|scope| {
            let result = scope
                .spawn(|| {
                    let _guard = counter.write();
                    panic!("arithmetic panic");
                })
                .join();
            assert!(result.is_err());
        });
        assert_eq!(counter.inc(1), 2);
    }
}
