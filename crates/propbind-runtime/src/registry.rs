#![forbid(unsafe_code)]

//! Per-instance subscription registry.
//!
//! Maps `(instance, property)` to the one active [`SubscriptionHandle`] for
//! that pair. Entries are keyed by [`InstanceId`], so the registry never
//! keeps an instance alive.
//!
//! The registry is thread-local: instances, streams and handles are
//! single-threaded (`Rc`) objects and never cross threads.
//!
//! Every function that removes a handle returns it or drops it only after
//! the registry borrow is released, because a stream's teardown may call
//! back into the engine.

use std::cell::RefCell;

use ahash::AHashMap;
use propbind_core::{InstanceId, SubscriptionHandle};

type Entries = AHashMap<String, SubscriptionHandle>;

thread_local! {
    static REGISTRY: RefCell<AHashMap<InstanceId, Entries>> = RefCell::new(AHashMap::new());
}

/// Remove and return the handle for `(id, property)`.
pub fn take(id: InstanceId, property: &str) -> Option<SubscriptionHandle> {
    REGISTRY
        .try_with(|registry| {
            let mut registry = registry.borrow_mut();
            let entries = registry.get_mut(&id)?;
            let handle = entries.remove(property);
            if entries.is_empty() {
                registry.remove(&id);
            }
            handle
        })
        .ok()
        .flatten()
}

/// Store `handle` for `(id, property)`, returning any handle it displaced.
pub fn insert(
    id: InstanceId,
    property: &str,
    handle: SubscriptionHandle,
) -> Option<SubscriptionHandle> {
    REGISTRY.with(|registry| {
        registry
            .borrow_mut()
            .entry(id)
            .or_default()
            .insert(property.to_owned(), handle)
    })
}

/// Dispose the handle for `(id, property)`. Returns whether one existed.
pub fn dispose(id: InstanceId, property: &str) -> bool {
    match take(id, property) {
        Some(mut handle) => {
            handle.dispose();
            true
        }
        None => false,
    }
}

/// Dispose every handle registered for `id`. Returns how many there were.
pub fn purge(id: InstanceId) -> usize {
    let entries = REGISTRY
        .try_with(|registry| registry.borrow_mut().remove(&id))
        .ok()
        .flatten();
    let Some(entries) = entries else {
        return 0;
    };
    let count = entries.len();
    for (_, mut handle) in entries {
        handle.dispose();
    }
    count
}

#[must_use]
pub fn contains(id: InstanceId, property: &str) -> bool {
    REGISTRY.with(|registry| {
        registry
            .borrow()
            .get(&id)
            .is_some_and(|entries| entries.contains_key(property))
    })
}

/// Properties with a registered handle for `id`, sorted.
#[must_use]
pub fn properties(id: InstanceId) -> Vec<String> {
    REGISTRY.with(|registry| {
        let mut names: Vec<String> = registry
            .borrow()
            .get(&id)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    })
}

/// Handles registered on this thread.
#[must_use]
pub fn active_subscriptions() -> usize {
    REGISTRY.with(|registry| registry.borrow().values().map(|entries| entries.len()).sum())
}

/// Instances with at least one registered handle on this thread.
#[must_use]
pub fn active_instances() -> usize {
    REGISTRY.with(|registry| registry.borrow().len())
}
