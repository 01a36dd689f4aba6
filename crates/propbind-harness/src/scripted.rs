#![forbid(unsafe_code)]

//! Test-driven stream with subscription bookkeeping.
//!
//! A [`ScriptedStream`] behaves like a hot subject whose values the test
//! pushes with [`emit`](ScriptedStream::emit), and additionally:
//!
//! - counts subscribes and disposals;
//! - can replay a fixed prefix synchronously on every subscribe;
//! - can be made to ignore disposal ([`ScriptedStream::leaky`]), so that the
//!   engine's own fencing is the only thing standing between a stale
//!   observer and the state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use propbind_core::{Observer, StreamError, StreamRef, SubscriptionHandle, ValueStream};

struct Entry<V> {
    id: u64,
    observer: Rc<Observer<V>>,
    disposed: Rc<Cell<bool>>,
}

struct ScriptedInner<V> {
    entries: Vec<Entry<V>>,
    next_id: u64,
    subscribes: usize,
    disposals: usize,
    replay: Vec<V>,
    honor_disposal: bool,
}

/// Hot stream driven by the test.
///
/// Cloning creates a new handle to the **same** stream.
pub struct ScriptedStream<V> {
    inner: Rc<RefCell<ScriptedInner<V>>>,
}

impl<V> Clone for ScriptedStream<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for ScriptedStream<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ScriptedStream")
            .field("active", &inner.entries.len())
            .field("subscribes", &inner.subscribes)
            .field("disposals", &inner.disposals)
            .field("honor_disposal", &inner.honor_disposal)
            .finish()
    }
}

impl<V: Clone + 'static> Default for ScriptedStream<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + 'static> ScriptedStream<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ScriptedInner {
                entries: Vec::new(),
                next_id: 0,
                subscribes: 0,
                disposals: 0,
                replay: Vec::new(),
                honor_disposal: true,
            })),
        }
    }

    /// A stream that keeps delivering to observers after their handle was
    /// disposed.
    #[must_use]
    pub fn leaky() -> Self {
        let stream = Self::new();
        stream.inner.borrow_mut().honor_disposal = false;
        stream
    }

    /// Emit `values` synchronously to every new subscriber.
    #[must_use]
    pub fn replaying(self, values: impl IntoIterator<Item = V>) -> Self {
        self.inner.borrow_mut().replay = values.into_iter().collect();
        self
    }

    /// Push `value` to every observer still attached.
    pub fn emit(&self, value: V) {
        for observer in self.targets() {
            observer.next(value.clone());
        }
    }

    pub fn fail(&self, error: StreamError) {
        for observer in self.targets() {
            observer.error(error.clone());
        }
    }

    pub fn complete(&self) {
        for observer in self.targets() {
            observer.complete();
        }
    }

    /// Observers whose handle is still live.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner
            .borrow()
            .entries
            .iter()
            .filter(|e| !e.disposed.get())
            .count()
    }

    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.inner.borrow().subscribes
    }

    #[must_use]
    pub fn dispose_count(&self) -> usize {
        self.inner.borrow().disposals
    }

    /// A new stream handle. Each call yields a distinct identity.
    #[must_use]
    pub fn stream(&self) -> StreamRef<V> {
        StreamRef::new(self.clone())
    }

    fn targets(&self) -> Vec<Rc<Observer<V>>> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|e| Rc::clone(&e.observer))
            .collect()
    }
}

impl<V: Clone + 'static> ValueStream<V> for ScriptedStream<V> {
    fn subscribe(&self, observer: Observer<V>) -> SubscriptionHandle {
        let observer = Rc::new(observer);
        let disposed = Rc::new(Cell::new(false));
        let (id, replay) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribes += 1;
            inner.entries.push(Entry {
                id,
                observer: Rc::clone(&observer),
                disposed: Rc::clone(&disposed),
            });
            (id, inner.replay.clone())
        };
        tracing::trace!(message = "scripted.subscribe", id);

        for value in replay {
            observer.next(value);
        }

        let weak = Rc::downgrade(&self.inner);
        SubscriptionHandle::new(move || {
            disposed.set(true);
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut inner = inner.borrow_mut();
            inner.disposals += 1;
            if inner.honor_disposal {
                inner.entries.retain(|e| e.id != id);
            }
        })
    }
}
