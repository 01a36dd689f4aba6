#![forbid(unsafe_code)]

//! Memoized derivations with automatic dependency tracking.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. Every evaluation runs inside a tracking frame,
//! and the sources read during it become the dependency set until the next
//! evaluation. When a dependency changes, the cached value is invalidated
//! (marked dirty).
//!
//! Without observers, recomputation is deferred to the next
//! [`get()`](Computed::get). With at least one [`Watch`] attached, a dependency
//! change recomputes eagerly and the watch fires only if the new value
//! differs from the cached one.
//!
//! # Invariants
//!
//! 1. `get()` always returns a value consistent with the current state of all
//!    dependencies (no stale reads after a dependency mutation completes).
//! 2. The compute function is called at most once per dependency change cycle
//!    (memoization).
//! 3. Version increments by exactly 1 per recomputation.
//! 4. A watch callback runs once per distinct derived value, never for a
//!    recomputation that yields an equal value.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: The cached value remains from the last
//!   successful computation. The dirty flag stays set so the next `get()` will
//!   retry.
//! - **Dependency dropped**: The subscription becomes inert. The computed
//!   value retains its last cached result and never becomes dirty again from
//!   that source.
//! - **Compute reads its own `Computed`**: re-entrant borrow, panics.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::observable::Subscription;
use super::tracking::{self, Dependency};

type Callback<T> = dyn Fn(&T);

/// Shared interior for [`Computed<T>`].
struct ComputedInner<T> {
    source_id: u64,
    compute: Box<dyn Fn() -> T>,
    /// Cached result (None only before first computation).
    cached: Option<T>,
    dirty: Cell<bool>,
    /// Bumped on each recomputation.
    version: u64,
    /// Subscriptions to the sources read by the last evaluation.
    dependencies: Vec<Subscription>,
    observers: Vec<Weak<Callback<T>>>,
}

/// A memoized value derived from whatever reactive sources its compute
/// function reads.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
pub struct Computed<T> {
    inner: Rc<RefCell<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Computed")
            .field("cached", &inner.cached)
            .field("dirty", &inner.dirty.get())
            .field("version", &inner.version)
            .field("dependencies", &inner.dependencies.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed value. Nothing is evaluated until the first read
    /// or the first [`observe`](Computed::observe).
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ComputedInner {
                source_id: tracking::next_source_id(),
                compute: Box::new(compute),
                cached: None,
                dirty: Cell::new(true),
                version: 0,
                dependencies: Vec::new(),
                observers: Vec::new(),
            })),
        }
    }

    /// Get the current value, recomputing if any dependency has changed.
    ///
    /// Registers this computed as a dependency when read inside another
    /// tracked evaluation.
    #[must_use]
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track_read();
        Self::refresh_if_dirty(&self.inner);
        let inner = self.inner.borrow();
        f(inner
            .cached
            .as_ref()
            .expect("cached is always Some after refresh"))
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty.get()
    }

    /// Force invalidation of the cached value. The next `get()` will
    /// recompute.
    pub fn invalidate(&self) {
        self.inner.borrow().dirty.set(true);
    }

    /// Number of recomputations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of sources read by the last evaluation.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.borrow().dependencies.len()
    }

    /// Evaluate now and call `callback` each time a dependency change
    /// produces a different value. The callback is not called for the
    /// initial evaluation.
    pub fn observe(&self, callback: impl Fn(&T) + 'static) -> Watch {
        Self::refresh_if_dirty(&self.inner);
        let subscription = self.add_observer(Rc::new(callback));
        Watch {
            subscription,
            _source: Some(Box::new(self.clone())),
        }
    }

    fn add_observer(&self, callback: Rc<Callback<T>>) -> Subscription {
        self.inner
            .borrow_mut()
            .observers
            .push(Rc::downgrade(&callback));
        Subscription::from_guard(Box::new(callback))
    }

    fn track_read(&self) {
        if !tracking::is_tracking() {
            return;
        }
        let source_id = self.inner.borrow().source_id;
        tracking::record(source_id, || {
            let source = self.clone();
            Dependency::new(source_id, move |invalidate| {
                // Keep this computed eager while someone depends on it.
                Self::refresh_if_dirty(&source.inner);
                source.add_observer(Rc::new(move |_: &T| invalidate()))
            })
        });
    }

    fn refresh_if_dirty(inner: &Rc<RefCell<ComputedInner<T>>>) -> bool {
        let stale = {
            let guard = inner.borrow();
            guard.dirty.get() || guard.cached.is_none()
        };
        if stale { Self::recompute(inner) } else { false }
    }

    /// Re-evaluate under tracking and swap in the new dependency set.
    /// Returns whether the value changed.
    fn recompute(inner: &Rc<RefCell<ComputedInner<T>>>) -> bool {
        let (value, sources) = {
            let guard = inner.borrow();
            tracking::track(|| (guard.compute)())
        };

        let weak = Rc::downgrade(inner);
        let invalidate: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(strong) = weak.upgrade() {
                Self::on_dependency_changed(&strong);
            }
        });
        let dependencies: Vec<Subscription> = sources
            .iter()
            .map(|dep| dep.connect(Rc::clone(&invalidate)))
            .collect();

        let (changed, previous) = {
            let mut guard = inner.borrow_mut();
            let changed = guard.cached.as_ref() != Some(&value);
            guard.cached = Some(value);
            guard.dirty.set(false);
            guard.version += 1;
            let previous = std::mem::replace(&mut guard.dependencies, dependencies);
            (changed, previous)
        };
        // Old subscriptions drop outside the borrow.
        drop(previous);
        changed
    }

    fn on_dependency_changed(inner: &Rc<RefCell<ComputedInner<T>>>) {
        let observers = {
            let mut guard = inner.borrow_mut();
            guard.dirty.set(true);
            guard.observers.retain(|w| w.strong_count() > 0);
            guard.observers.clone()
        };
        if observers.is_empty() {
            return;
        }

        if !Self::recompute(inner) {
            return;
        }
        let Some(value) = inner.borrow().cached.clone() else {
            return;
        };
        for weak in observers {
            let Some(callback) = weak.upgrade() else {
                continue;
            };
            callback(&value);
        }
    }
}

/// Handle for a [`Computed::observe`] registration.
///
/// Keeps the observed computed alive. Dropping or disposing it stops
/// notifications.
#[must_use = "dropping a Watch stops notifications immediately"]
pub struct Watch {
    subscription: Subscription,
    _source: Option<Box<dyn Any>>,
}

impl Watch {
    /// Stop notifications now. Idempotent.
    pub fn dispose(&mut self) {
        self.subscription.dispose();
        self._source = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
