#![forbid(unsafe_code)]

//! Version-tracked shared values with change notification.
//!
//! # Design
//!
//! [`Observable<T>`] keeps its value, a version counter and a list of weak
//! subscriber callbacks in shared storage. [`Subscription`] owns the strong
//! side of one callback; dropping it makes the weak entry dead, and dead
//! entries are pruned on the next notification.
//!
//! Notifications run with the internal borrow released, so a callback may
//! read or write any observable, including the one that notified it.
//!
//! # Failure Modes
//!
//! - **Callback panics**: The panic propagates to the caller of `set()`.
//!   The value and version have already been updated.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::batch;
use super::tracking::{self, Dependency};

type Callback<T> = dyn Fn(&T);

struct ObservableInner<T> {
    source_id: u64,
    value: T,
    version: u64,
    subscribers: Vec<Weak<Callback<T>>>,
}

/// A shared, version-tracked value.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                source_id: tracking::next_source_id(),
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Current value. Registers a dependency when read inside a tracked
    /// evaluation.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Access the current value by reference. Registers a dependency when
    /// read inside a tracked evaluation.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track_read();
        f(&self.inner.borrow().value)
    }

    /// Replace the value. Equal values are ignored.
    ///
    /// Subscribers run immediately, or when the outermost [`BatchScope`]
    /// exits if one is active.
    ///
    /// [`BatchScope`]: super::BatchScope
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.schedule_notify();
    }

    /// Mutate in place. Notifies only if the value changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.inner.borrow().value.clone();
        f(&mut next);
        self.set(next);
    }

    /// Register a callback invoked with the new value after each change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::from_guard(Box::new(strong))
    }

    /// Number of mutations that changed the value.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn source_id(&self) -> u64 {
        self.inner.borrow().source_id
    }

    fn track_read(&self) {
        if !tracking::is_tracking() {
            return;
        }
        let source_id = self.source_id();
        tracking::record(source_id, || {
            let source = self.clone();
            let seen = self.version();
            Dependency::new(source_id, move |invalidate| {
                // A deferred notification may arrive for a change the
                // evaluation already read; only newer versions invalidate.
                let weak = Rc::downgrade(&source.inner);
                source.subscribe(move |_| {
                    let newer = weak.upgrade().is_some_and(|inner| inner.borrow().version > seen);
                    if newer {
                        invalidate();
                    }
                })
            })
        });
    }

    fn schedule_notify(&self) {
        let weak = Rc::downgrade(&self.inner);
        let source_id = self.source_id();
        batch::defer_or_run(source_id, move || {
            if let Some(inner) = weak.upgrade() {
                Self::notify(&inner);
            }
        });
    }

    fn notify(inner: &Rc<RefCell<ObservableInner<T>>>) {
        let callbacks = {
            let mut guard = inner.borrow_mut();
            guard.subscribers.retain(|w| w.strong_count() > 0);
            guard.subscribers.clone()
        };
        for weak in callbacks {
            // Upgrade per callback so one dropped mid-cycle is skipped.
            let Some(callback) = weak.upgrade() else {
                continue;
            };
            let value = inner.borrow().value.clone();
            callback(&value);
        }
    }
}

/// RAII guard for a callback registration. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    guard: Option<Box<dyn Any>>,
}

impl Subscription {
    pub(crate) fn from_guard(guard: Box<dyn Any>) -> Self {
        Self { guard: Some(guard) }
    }

    /// Unsubscribe now. Idempotent.
    pub fn dispose(&mut self) {
        self.guard = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn set_bumps_version_and_notifies() {
        let obs = Observable::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| sink.borrow_mut().push(*v));

        obs.set(2);
        obs.set(3);

        assert_eq!(obs.get(), 3);
        assert_eq!(obs.version(), 2);
        assert_eq!(*seen.borrow(), vec![2, 3]);
    }

    #[test]
    fn equal_value_is_noop() {
        let obs = Observable::new(5);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let _sub = obs.subscribe(move |_| c.set(c.get() + 1));

        obs.set(5);
        assert_eq!(obs.version(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn subscribers_notified_in_registration_order() {
        let obs = Observable::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let o2 = Rc::clone(&order);
        let _a = obs.subscribe(move |_| o1.borrow_mut().push('a'));
        let _b = obs.subscribe(move |_| o2.borrow_mut().push('b'));

        obs.set(1);
        assert_eq!(*order.borrow(), vec!['a', 'b']);
    }

    #[test]
    fn dropped_subscription_stops_callbacks() {
        let obs = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let sub = obs.subscribe(move |_| c.set(c.get() + 1));

        obs.set(1);
        drop(sub);
        obs.set(2);

        assert_eq!(calls.get(), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_write_back() {
        let obs = Observable::new(0);
        let writer = obs.clone();
        let _sub = obs.subscribe(move |v| {
            if *v < 3 {
                writer.set(v + 1);
            }
        });

        obs.set(1);
        assert_eq!(obs.get(), 3);
    }

    #[test]
    fn subscription_disposed_mid_cycle_is_skipped() {
        let obs = Observable::new(0);
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let hits = Rc::new(Cell::new(0));

        let later_ref = Rc::clone(&later);
        let _first = obs.subscribe(move |_| {
            if let Some(mut sub) = later_ref.borrow_mut().take() {
                sub.dispose();
            }
        });
        let h = Rc::clone(&hits);
        *later.borrow_mut() = Some(obs.subscribe(move |_| h.set(h.get() + 1)));

        obs.set(1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn dependency_ignores_change_already_read() {
        use crate::reactive::{BatchScope, tracking};

        let obs = Observable::new(0);
        let hits = Rc::new(Cell::new(0));
        let scope = BatchScope::new();
        obs.set(1);
        // Read after the write, before the deferred notification flushes.
        let (_, deps) = tracking::track(|| obs.get());
        let h = Rc::clone(&hits);
        let _sub = deps[0].connect(Rc::new(move || h.set(h.get() + 1)));
        drop(scope);
        assert_eq!(hits.get(), 0);

        obs.set(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn update_in_place() {
        let obs = Observable::new(vec![1, 2]);
        obs.update(|v| v.push(3));
        assert_eq!(obs.get(), vec![1, 2, 3]);
        assert_eq!(obs.version(), 1);

        obs.update(|_| {});
        assert_eq!(obs.version(), 1);
    }
}
