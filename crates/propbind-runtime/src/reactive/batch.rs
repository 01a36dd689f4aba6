#![forbid(unsafe_code)]

//! Deferred notification scopes.
//!
//! While a [`BatchScope`] is alive on the current thread, observable writes
//! take effect immediately but their notifications are queued. When the
//! outermost scope drops, each changed source is notified once, in the
//! order it was first written, and observers see the final values only.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

type Pending = Box<dyn FnOnce()>;

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<(u64, Pending)>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// RAII guard that defers observable notifications until it drops.
///
/// Scopes nest; only the outermost one flushes.
#[must_use = "notifications flush when the scope is dropped"]
pub struct BatchScope {
    // Tied to the thread-local queue it opened.
    _not_send: PhantomData<Rc<()>>,
}

impl BatchScope {
    pub fn new() -> Self {
        BATCH.with(|b| b.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }

    /// Whether any scope is open on this thread.
    #[must_use]
    pub fn is_active() -> bool {
        BATCH.with(|b| b.borrow().depth > 0)
    }

    /// Number of distinct sources waiting to notify.
    #[must_use]
    pub fn pending_count() -> usize {
        BATCH.with(|b| b.borrow().pending.len())
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = BATCH
            .try_with(|b| {
                let mut state = b.borrow_mut();
                state.depth = state.depth.saturating_sub(1);
                state.depth == 0
            })
            .unwrap_or(false);
        if outermost {
            flush();
        }
    }
}

fn flush() {
    // Notifications may queue more work only if they open their own scope,
    // which flushes itself; loop until the queue is drained.
    loop {
        let pending = BATCH
            .try_with(|b| std::mem::take(&mut b.borrow_mut().pending))
            .unwrap_or_default();
        if pending.is_empty() {
            break;
        }
        for (_, notify) in pending {
            notify();
        }
    }
}

/// Run `notify` now, or queue it under `source_id` if a scope is open.
/// A source already queued is not queued twice.
pub(crate) fn defer_or_run(source_id: u64, notify: impl FnOnce() + 'static) {
    let mut slot: Option<Pending> = Some(Box::new(notify));
    BATCH.with(|b| {
        let mut state = b.borrow_mut();
        if state.depth == 0 {
            return;
        }
        let queued = state.pending.iter().any(|(id, _)| *id == source_id);
        let notify = slot.take();
        if !queued {
            state.pending.extend(notify.map(|n| (source_id, n)));
        }
    });
    if let Some(notify) = slot {
        notify();
    }
}

/// Run `f` inside a [`BatchScope`].
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _scope = BatchScope::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;
    use std::cell::Cell;

    #[test]
    fn notifications_deferred_until_scope_exit() {
        let obs = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let _sub = obs.subscribe(move |_| c.set(c.get() + 1));

        {
            let _scope = BatchScope::new();
            obs.set(1);
            obs.set(2);
            assert_eq!(obs.get(), 2);
            assert_eq!(calls.get(), 0);
            assert_eq!(BatchScope::pending_count(), 1);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn observers_see_consistent_snapshot() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sa, sb, sink) = (a.clone(), b.clone(), Rc::clone(&seen));
        let _sub = a.subscribe(move |_| sink.borrow_mut().push((sa.get(), sb.get())));

        batch(|| {
            a.set(1);
            b.set(10);
        });
        assert_eq!(*seen.borrow(), vec![(1, 10)]);
    }

    #[test]
    fn nested_scopes_flush_once_at_outermost() {
        let obs = Observable::new(0);
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let _sub = obs.subscribe(move |_| c.set(c.get() + 1));

        batch(|| {
            batch(|| obs.set(1));
            assert_eq!(calls.get(), 0);
            obs.set(2);
        });
        assert_eq!(calls.get(), 1);
        assert!(!BatchScope::is_active());
    }

    #[test]
    fn flush_order_follows_first_write() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let (oa, ob) = (Rc::clone(&order), Rc::clone(&order));
        let _sa = a.subscribe(move |_| oa.borrow_mut().push('a'));
        let _sb = b.subscribe(move |_| ob.borrow_mut().push('b'));

        batch(|| {
            b.set(1);
            a.set(1);
            b.set(2);
        });
        assert_eq!(*order.borrow(), vec!['b', 'a']);
    }
}
