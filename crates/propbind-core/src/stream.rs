#![forbid(unsafe_code)]

//! The observable stream contract.
//!
//! A [`ValueStream`] delivers values, then at most one terminal notification
//! (error or completion), to every [`Observer`] subscribed to it.
//! Subscribing returns a [`SubscriptionHandle`] whose disposal stops all
//! further callbacks for that observer.
//!
//! # Invariants
//!
//! 1. Disposal is idempotent. Disposing twice, or disposing a handle whose
//!    stream already terminated, is a no-op.
//! 2. Once a handle is disposed its observer receives nothing, including
//!    the remainder of a dispatch that is already in progress.
//! 3. Dropping a handle disposes it.
//!
//! [`Subject`] is a hot multicast implementation used by hosts that push
//! values imperatively, and by tests.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::StreamError;

/// Callbacks registered by one subscriber.
pub struct Observer<V> {
    next: Box<dyn Fn(V)>,
    error: Box<dyn Fn(StreamError)>,
    complete: Box<dyn Fn()>,
}

impl<V: 'static> Observer<V> {
    /// Observer with a value callback and no-op terminal callbacks.
    pub fn new(next: impl Fn(V) + 'static) -> Self {
        Self {
            next: Box::new(next),
            error: Box::new(|_| {}),
            complete: Box::new(|| {}),
        }
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(StreamError) + 'static) -> Self {
        self.error = Box::new(f);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn() + 'static) -> Self {
        self.complete = Box::new(f);
        self
    }

    pub fn next(&self, value: V) {
        (self.next)(value);
    }

    pub fn error(&self, error: StreamError) {
        (self.error)(error);
    }

    pub fn complete(&self) {
        (self.complete)();
    }
}

impl<V> fmt::Debug for Observer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").finish_non_exhaustive()
    }
}

/// RAII guard for one subscription. Disposes on drop.
#[must_use = "dropping a SubscriptionHandle disposes the subscription"]
pub struct SubscriptionHandle {
    teardown: Option<Box<dyn FnOnce()>>,
}

impl SubscriptionHandle {
    /// Handle that runs `teardown` exactly once on disposal.
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Handle with nothing to tear down, already disposed.
    pub fn closed() -> Self {
        Self { teardown: None }
    }

    /// Stop all further callbacks to this subscription's observer.
    pub fn dispose(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.teardown.is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A source of values that observers can subscribe to.
pub trait ValueStream<V> {
    /// Register `observer`. Callbacks may arrive before this returns.
    fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle;
}

/// Shared stream handle compared by identity.
///
/// Two `StreamRef`s are equal when they point at the same stream object,
/// which is how a derivation that returns streams is checked for change.
pub struct StreamRef<V> {
    inner: Rc<dyn ValueStream<V>>,
}

impl<V> StreamRef<V> {
    pub fn new(stream: impl ValueStream<V> + 'static) -> Self {
        Self {
            inner: Rc::new(stream),
        }
    }

    pub fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle {
        self.inner.subscribe(observer)
    }
}

impl<V> Clone for StreamRef<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> PartialEq for StreamRef<V> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V> Eq for StreamRef<V> {}

impl<V> fmt::Debug for StreamRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamRef")
            .field(&Rc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

impl<V> ValueStream<V> for StreamRef<V> {
    fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle {
        self.inner.subscribe(observer)
    }
}

impl<V: Clone + 'static> From<Subject<V>> for StreamRef<V> {
    fn from(subject: Subject<V>) -> Self {
        Self::new(subject)
    }
}

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

struct Slot<V> {
    id: u64,
    observer: Observer<V>,
    closed: Cell<bool>,
}

#[derive(Clone)]
enum Terminal {
    Completed,
    Failed(StreamError),
}

struct SubjectInner<V> {
    slots: Vec<Rc<Slot<V>>>,
    next_id: u64,
    terminal: Option<Terminal>,
}

/// Hot multicast stream. Values pushed with [`next`](Subject::next) reach
/// every observer subscribed at that moment.
///
/// After [`error`](Subject::error) or [`complete`](Subject::complete) the
/// subject is terminated: later `next` calls are dropped and late
/// subscribers receive the terminal notification immediately.
///
/// Cloning a `Subject` creates a new handle to the **same** stream.
pub struct Subject<V> {
    inner: Rc<RefCell<SubjectInner<V>>>,
}

impl<V> Clone for Subject<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Subject<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Subject")
            .field("observers", &inner.slots.len())
            .field("terminated", &inner.terminal.is_some())
            .finish()
    }
}

impl<V: Clone + 'static> Default for Subject<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + 'static> Subject<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SubjectInner {
                slots: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }

    /// Push a value to every live observer, in subscription order.
    pub fn next(&self, value: V) {
        let slots = {
            let inner = self.inner.borrow();
            if inner.terminal.is_some() {
                return;
            }
            inner.slots.clone()
        };
        for slot in slots {
            if !slot.closed.get() {
                slot.observer.next(value.clone());
            }
        }
    }

    /// Terminate with an error.
    pub fn error(&self, error: StreamError) {
        self.terminate(Terminal::Failed(error));
    }

    /// Terminate normally.
    pub fn complete(&self) {
        self.terminate(Terminal::Completed);
    }

    fn terminate(&self, terminal: Terminal) {
        let slots = {
            let mut inner = self.inner.borrow_mut();
            if inner.terminal.is_some() {
                return;
            }
            inner.terminal = Some(terminal.clone());
            std::mem::take(&mut inner.slots)
        };
        for slot in slots {
            if slot.closed.replace(true) {
                continue;
            }
            match &terminal {
                Terminal::Completed => slot.observer.complete(),
                Terminal::Failed(error) => slot.observer.error(error.clone()),
            }
        }
    }

    /// Number of observers currently subscribed.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.borrow().terminal.is_some()
    }

    /// Shared stream handle for this subject.
    #[must_use]
    pub fn stream(&self) -> StreamRef<V> {
        StreamRef::new(self.clone())
    }
}

impl<V: Clone + 'static> ValueStream<V> for Subject<V> {
    fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle {
        let terminal = self.inner.borrow().terminal.clone();
        if let Some(terminal) = terminal {
            match terminal {
                Terminal::Completed => observer.complete(),
                Terminal::Failed(error) => observer.error(error),
            }
            return SubscriptionHandle::closed();
        }

        let slot = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let slot = Rc::new(Slot {
                id,
                observer,
                closed: Cell::new(false),
            });
            inner.slots.push(Rc::clone(&slot));
            slot
        };

        let weak = Rc::downgrade(&self.inner);
        SubscriptionHandle::new(move || {
            slot.closed.set(true);
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().slots.retain(|s| s.id != slot.id);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Cold sequence
// ---------------------------------------------------------------------------

/// Cold stream that replays a fixed sequence synchronously on every
/// subscription, then completes.
#[derive(Debug, Clone)]
pub struct Sequence<V> {
    values: Rc<[V]>,
}

impl<V: Clone> Sequence<V> {
    pub fn new(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl<V: Clone + 'static> ValueStream<V> for Sequence<V> {
    fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle {
        for value in self.values.iter() {
            observer.next(value.clone());
        }
        observer.complete();
        SubscriptionHandle::closed()
    }
}
