#![forbid(unsafe_code)]

//! Binding controller: load and release one binding on one instance.
//!
//! # Load
//!
//! 1. Dispose the registered subscription for `(instance, property)`, if
//!    any, and fence its load cycle.
//! 2. Run the host's clear-error and start-loading hooks, as one update.
//! 3. Resolve the stream (static, or produced for this instance).
//! 4. Start a new load cycle and subscribe.
//! 5. Register the new handle.
//!
//! # Invariants
//!
//! 1. At most one subscription per `(instance, property)` is registered,
//!    and the previous one is disposed before the next subscribe starts.
//! 2. Each load cycle has a generation number. Callbacks carry the
//!    generation they were created for and are dropped if it is no longer
//!    current, so a disposed stream can never commit a value.
//! 3. If a load re-enters itself (a synchronous emission triggers another
//!    load of the same property), the inner load wins and the outer one
//!    disposes its own handle instead of registering it.
//! 4. Stream errors never escape `load`; they go to the set-error hook.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use propbind_core::{Observer, StreamError};

use crate::declaration::Binding;
use crate::diagnostics;
use crate::host::{Instance, WeakInstance};
use crate::pipeline::{self, EmissionOutcome};
use crate::reactive::{Watch, batch, untracked};
use crate::registry;
use crate::watcher;

/// Mutable runtime state of one `(instance, property)` pair.
#[derive(Debug, Default)]
pub(crate) struct CycleState {
    generation: Cell<u64>,
    emissions: Cell<usize>,
    latched: Cell<bool>,
    live: Cell<bool>,
    watch: RefCell<Option<Watch>>,
}

impl CycleState {
    /// Start a new load cycle. Resets the emission counter and the latch.
    pub(crate) fn begin(&self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.emissions.set(0);
        self.latched.set(false);
        self.live.set(true);
        generation
    }

    /// End the current cycle so none of its callbacks are accepted.
    pub(crate) fn retire(&self) {
        self.generation.set(self.generation.get() + 1);
        self.live.set(false);
    }

    /// The current cycle stopped receiving (completed or failed).
    pub(crate) fn finish(&self) {
        self.live.set(false);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn accepts(&self, generation: u64) -> bool {
        self.live.get() && self.generation.get() == generation
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }

    /// 0-based index for the next emission of this cycle.
    pub(crate) fn next_index(&self) -> usize {
        let index = self.emissions.get();
        self.emissions.set(index + 1);
        index
    }

    pub(crate) fn is_latched(&self) -> bool {
        self.latched.get()
    }

    pub(crate) fn latch(&self) {
        self.latched.set(true);
    }

    /// Swap the computed watch, returning the previous one.
    pub(crate) fn replace_watch(&self, watch: Option<Watch>) -> Option<Watch> {
        std::mem::replace(&mut *self.watch.borrow_mut(), watch)
    }

    pub(crate) fn has_watch(&self) -> bool {
        self.watch.borrow().as_ref().is_some_and(Watch::is_active)
    }
}

/// Tear down any existing subscription for this binding on `instance`,
/// then subscribe anew.
pub fn load<V: Clone + PartialEq + 'static>(binding: &Binding<V>, instance: &Instance<V>) {
    let id = instance.id();
    let property = binding.property();
    let cycle = instance.cycle(property);

    if let Some(mut previous) = registry::take(id, property) {
        previous.dispose();
        diagnostics::record_disposal();
    }
    cycle.retire();

    let hooks = instance.class().hooks();
    batch(|| {
        hooks.clear_error(instance);
        hooks.start_loading(instance);
    });

    let stream = untracked(|| binding.resolve(instance));
    let generation = cycle.begin();
    diagnostics::record_load();
    tracing::debug!(
        message = "binding.load",
        instance = %id,
        property = %property,
        generation,
    );

    let observer = observer_for(binding, instance.downgrade(), Rc::clone(&cycle), generation);
    let mut handle = untracked(|| stream.subscribe(observer));

    if cycle.generation() != generation {
        // A load started from inside subscribe already registered its own.
        handle.dispose();
        diagnostics::record_disposal();
        tracing::debug!(
            message = "binding.load.superseded",
            instance = %id,
            property = %property,
            generation,
        );
        return;
    }
    if let Some(mut displaced) = registry::insert(id, property, handle) {
        displaced.dispose();
        diagnostics::record_disposal();
    }
}

/// Dispose this binding's subscription and computed watch on `instance`.
pub fn release<V: Clone + PartialEq + 'static>(binding: &Binding<V>, instance: &Instance<V>) {
    let property = binding.property();
    if registry::dispose(instance.id(), property) {
        diagnostics::record_disposal();
    }
    if let Some(cycle) = instance.existing_cycle(property) {
        cycle.retire();
    }
    watcher::disarm(binding, instance);
    tracing::debug!(
        message = "binding.dispose",
        instance = %instance.id(),
        property = %property,
    );
}

fn observer_for<V: Clone + PartialEq + 'static>(
    binding: &Binding<V>,
    weak: WeakInstance<V>,
    cycle: Rc<CycleState>,
    generation: u64,
) -> Observer<V> {
    let on_next = {
        let binding = binding.clone();
        let weak = weak.clone();
        let cycle = Rc::clone(&cycle);
        move |value: V| {
            if !cycle.accepts(generation) {
                stale(&binding, generation, "next");
                return;
            }
            let Some(instance) = weak.upgrade() else {
                return;
            };
            let index = cycle.next_index();
            let outcome = pipeline::process(&binding, &instance, &cycle, value, index);
            tracing::trace!(
                message = "binding.emit",
                instance = %instance.id(),
                property = %binding.property(),
                generation,
                index,
                committed = outcome == EmissionOutcome::Committed,
            );
        }
    };

    let on_error = {
        let binding = binding.clone();
        let weak = weak.clone();
        let cycle = Rc::clone(&cycle);
        move |error: StreamError| {
            if !cycle.accepts(generation) {
                stale(&binding, generation, "error");
                return;
            }
            cycle.finish();
            let Some(instance) = weak.upgrade() else {
                return;
            };
            tracing::debug!(
                message = "binding.error",
                instance = %instance.id(),
                property = %binding.property(),
                generation,
                error = %error,
            );
            let hooks = instance.class().hooks();
            batch(|| {
                hooks.stop_loading(&instance);
                hooks.set_error(&instance, &error);
            });
        }
    };

    let on_complete = {
        let binding = binding.clone();
        move || {
            if !cycle.accepts(generation) {
                stale(&binding, generation, "complete");
                return;
            }
            cycle.finish();
            let Some(instance) = weak.upgrade() else {
                return;
            };
            tracing::trace!(
                message = "binding.complete",
                instance = %instance.id(),
                property = %binding.property(),
                generation,
            );
            instance.class().hooks().stop_loading(&instance);
        }
    };

    Observer::new(on_next)
        .on_error(on_error)
        .on_complete(on_complete)
}

fn stale<V>(binding: &Binding<V>, generation: u64, kind: &'static str) {
    diagnostics::record_stale_callback();
    tracing::warn!(
        message = "binding.stale",
        property = %binding.property(),
        generation,
        kind,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostClass, Hooks};
    use crate::testing;
    use propbind_core::{InputSnapshot, Sequence, StreamRef, Subject, SubscriptionHandle, ValueStream};

    fn host(binding: &Binding<i32>) -> Instance<i32> {
        HostClass::new("Probe")
            .bind(binding.clone())
            .unwrap()
            .finish()
            .instantiate(InputSnapshot::new())
    }

    #[test]
    fn cycle_state_resets_on_begin() {
        let cycle = CycleState::default();
        let g1 = cycle.begin();
        cycle.next_index();
        cycle.latch();
        let g2 = cycle.begin();
        assert_eq!(g2, g1 + 1);
        assert_eq!(cycle.next_index(), 0);
        assert!(!cycle.is_latched());
        assert!(cycle.accepts(g2));
        assert!(!cycle.accepts(g1));
        cycle.retire();
        assert!(!cycle.accepts(g2));
        assert!(!cycle.is_live());
    }

    #[test]
    fn load_registers_exactly_one_subscription() {
        let subject = Subject::new();
        let binding = Binding::builder("value", subject.stream()).build().unwrap();
        let instance = host(&binding);

        load(&binding, &instance);
        load(&binding, &instance);
        load(&binding, &instance);

        assert_eq!(subject.observer_count(), 1);
        assert!(registry::contains(instance.id(), "value"));
        subject.next(4);
        assert_eq!(instance.get("value"), Some(4));
    }

    #[test]
    fn loads_and_disposals_are_counted() {
        let subject: Subject<i32> = Subject::new();
        let binding = Binding::builder("value", subject.stream()).build().unwrap();
        let instance = host(&binding);
        let (loads, disposals) = (diagnostics::loads_total(), diagnostics::disposals_total());

        load(&binding, &instance);
        load(&binding, &instance);
        release(&binding, &instance);

        // Counters are process-wide; other tests only add to them.
        assert!(diagnostics::loads_total() >= loads + 2);
        assert!(diagnostics::disposals_total() >= disposals + 2);
    }

    #[test]
    fn reload_fences_old_stream() {
        let first = Subject::new();
        let second = Subject::new();
        let which = Rc::new(Cell::new(0));
        let (f, s, w) = (first.clone(), second.clone(), Rc::clone(&which));
        let binding = Binding::derived("value", move |_| {
            if w.get() == 0 { f.stream() } else { s.stream() }
        })
        .build()
        .unwrap();
        let instance = host(&binding);

        load(&binding, &instance);
        which.set(1);
        load(&binding, &instance);

        first.next(1);
        second.next(2);
        assert_eq!(instance.get("value"), Some(2));
        assert_eq!(first.observer_count(), 0);
    }

    /// Stream that ignores disposal, to exercise the generation fence.
    struct Leaky {
        observers: Rc<RefCell<Vec<Observer<i32>>>>,
    }

    impl ValueStream<i32> for Leaky {
        fn subscribe(&self, observer: Observer<i32>) -> SubscriptionHandle {
            self.observers.borrow_mut().push(observer);
            SubscriptionHandle::new(|| {})
        }
    }

    #[test]
    fn misbehaving_stream_cannot_commit_after_reload() {
        let observers = Rc::new(RefCell::new(Vec::new()));
        let stream = StreamRef::new(Leaky {
            observers: Rc::clone(&observers),
        });
        let binding = Binding::builder("value", stream).build().unwrap();
        let instance = host(&binding);

        load(&binding, &instance);
        load(&binding, &instance);
        let before = diagnostics::stale_callbacks_total();

        observers.borrow()[0].next(99);
        assert_eq!(instance.get("value"), None);
        assert!(diagnostics::stale_callbacks_total() > before);

        observers.borrow()[1].next(5);
        assert_eq!(instance.get("value"), Some(5));
    }

    #[test]
    fn hooks_run_in_order_around_cycle() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3, l4) = (
            Rc::clone(&log),
            Rc::clone(&log),
            Rc::clone(&log),
            Rc::clone(&log),
        );
        let subject: Subject<i32> = Subject::new();
        let binding = Binding::builder("value", subject.stream()).build().unwrap();
        let instance = HostClass::new("Probe")
            .with_hooks(
                Hooks::new()
                    .on_clear_error(move |_| l1.borrow_mut().push("clear"))
                    .on_start_loading(move |_| l2.borrow_mut().push("start"))
                    .on_stop_loading(move |_| l3.borrow_mut().push("stop"))
                    .on_set_error(move |_, e| l4.borrow_mut().push(if e.message() == "x" { "error" } else { "?" })),
            )
            .bind(binding.clone())
            .unwrap()
            .finish()
            .instantiate(InputSnapshot::new());

        load(&binding, &instance);
        subject.next(1);
        subject.error(StreamError::failed("x"));

        assert_eq!(*log.borrow(), vec!["clear", "start", "stop", "error"]);
        assert_eq!(instance.get("value"), Some(1));
    }

    #[test]
    fn completion_keeps_registry_entry() {
        let binding = Binding::builder("value", StreamRef::new(Sequence::new([1, 2, 3])))
            .build()
            .unwrap();
        let instance = host(&binding);
        load(&binding, &instance);

        assert_eq!(instance.get("value"), Some(3));
        assert!(registry::contains(instance.id(), "value"));
        assert!(!instance.cycle("value").is_live());
    }

    #[test]
    fn release_disposes_and_is_idempotent() {
        let subject = Subject::new();
        let binding = Binding::builder("value", subject.stream()).build().unwrap();
        let instance = host(&binding);

        load(&binding, &instance);
        release(&binding, &instance);
        release(&binding, &instance);

        assert_eq!(subject.observer_count(), 0);
        assert!(!registry::contains(instance.id(), "value"));
        subject.next(3);
        assert_eq!(instance.get("value"), None);
    }

    /// Stream whose first subscribe re-loads the binding before returning.
    struct Reentrant {
        inner: Subject<i32>,
        fired: Cell<bool>,
        target: Rc<RefCell<Option<(Binding<i32>, WeakInstance<i32>)>>>,
    }

    impl ValueStream<i32> for Reentrant {
        fn subscribe(&self, observer: Observer<i32>) -> SubscriptionHandle {
            if !self.fired.replace(true) {
                let target = self.target.borrow().clone();
                if let Some((binding, weak)) = target
                    && let Some(instance) = weak.upgrade()
                {
                    load(&binding, &instance);
                }
            }
            self.inner.subscribe(observer)
        }
    }

    #[test]
    fn reentrant_load_during_subscribe_keeps_inner_subscription() {
        let subject: Subject<i32> = Subject::new();
        let target = Rc::new(RefCell::new(None));
        let stream = StreamRef::new(Reentrant {
            inner: subject.clone(),
            fired: Cell::new(false),
            target: Rc::clone(&target),
        });
        let binding = Binding::builder("value", stream).build().unwrap();
        let instance = host(&binding);
        *target.borrow_mut() = Some((binding.clone(), instance.downgrade()));

        load(&binding, &instance);
        assert_eq!(subject.observer_count(), 1);
        assert_eq!(registry::properties(instance.id()), vec!["value".to_string()]);
        subject.next(8);
        assert_eq!(instance.get("value"), Some(8));
    }

    #[test]
    fn load_emit_dispose_and_stale_events_emitted() {
        let observers = Rc::new(RefCell::new(Vec::new()));
        let stream = StreamRef::new(Leaky {
            observers: Rc::clone(&observers),
        });
        let binding = Binding::builder("value", stream).build().unwrap();
        let instance = host(&binding);

        let ((), capture) = testing::capture(|| {
            load(&binding, &instance);
            observers.borrow()[0].next(1);
            release(&binding, &instance);
            observers.borrow()[0].next(2);
        });

        let seen = capture.messages();
        for expected in ["binding.load", "binding.emit", "binding.dispose", "binding.stale"] {
            assert!(
                seen.iter().any(|m| m == expected),
                "expected {expected} in {seen:?}"
            );
        }
        assert_eq!(instance.get("value"), Some(1));
    }
}
