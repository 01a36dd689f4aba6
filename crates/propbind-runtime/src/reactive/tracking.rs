#![forbid(unsafe_code)]

//! Dependency tracking for derivations.
//!
//! A tracking frame collects every reactive source read while it is on top
//! of the thread-local frame stack. Each source is recorded once per frame,
//! keyed by its source id. [`untracked`] pushes a paused frame so reads inside
//! it are not attributed to any enclosing derivation.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::observable::Subscription;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate an id for a new reactive source.
pub(crate) fn next_source_id() -> u64 {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Callback a dependency invokes when it changes.
pub(crate) type Invalidate = Rc<dyn Fn()>;

/// A source read during a tracked evaluation.
pub(crate) struct Dependency {
    pub(crate) source_id: u64,
    connect: Box<dyn Fn(Invalidate) -> Subscription>,
}

impl Dependency {
    pub(crate) fn new(
        source_id: u64,
        connect: impl Fn(Invalidate) -> Subscription + 'static,
    ) -> Self {
        Self {
            source_id,
            connect: Box::new(connect),
        }
    }

    /// Subscribe `invalidate` to this source's change notifications.
    pub(crate) fn connect(&self, invalidate: Invalidate) -> Subscription {
        (self.connect)(invalidate)
    }
}

thread_local! {
    /// `None` marks a paused (untracked) frame.
    static FRAMES: RefCell<Vec<Option<Vec<Dependency>>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the top frame even if the evaluation panics.
struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = FRAMES.try_with(|frames| frames.borrow_mut().pop());
    }
}

/// Whether a tracking frame is currently collecting.
#[must_use]
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| matches!(frames.borrow().last(), Some(Some(_))))
}

/// Record a read of `source_id`. `make` is only called when a frame is
/// collecting and the source has not been recorded in it yet.
pub(crate) fn record(source_id: u64, make: impl FnOnce() -> Dependency) {
    let wanted = FRAMES.with(|frames| match frames.borrow().last() {
        Some(Some(deps)) => !deps.iter().any(|d| d.source_id == source_id),
        _ => false,
    });
    if !wanted {
        return;
    }
    // Built outside the borrow: `make` clones reactive handles.
    let dependency = make();
    FRAMES.with(|frames| {
        if let Some(Some(deps)) = frames.borrow_mut().last_mut() {
            deps.push(dependency);
        }
    });
}

/// Evaluate `f`, returning its result and every source it read.
pub(crate) fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Dependency>) {
    FRAMES.with(|frames| frames.borrow_mut().push(Some(Vec::new())));
    let guard = FrameGuard;
    let result = f();
    let deps = FRAMES
        .with(|frames| frames.borrow_mut().last_mut().and_then(Option::take))
        .unwrap_or_default();
    drop(guard);
    (result, deps)
}

/// Evaluate `f` without attributing its reads to an enclosing derivation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(None));
    let _guard = FrameGuard;
    f()
}
