#![forbid(unsafe_code)]

//! Computed re-subscription watcher.
//!
//! For a computed binding, the dependency derivation (or, without one, the
//! stream function itself) is evaluated for the instance inside a
//! [`Computed`]. Whenever a reactive value it read changes and the result
//! differs from the previous evaluation, the binding is reloaded.
//!
//! The first evaluation happens when the watch is armed and never loads by
//! itself. At most one watch per `(instance, property)` is active: arming
//! disposes the previous watch before the new one is created.

use std::rc::Rc;

use crate::controller;
use crate::declaration::{Binding, StreamSource};
use crate::host::{Instance, Phase, WeakInstance};
use crate::reactive::{Computed, Watch};

/// Start (or restart) the watch for a computed binding. No-op otherwise.
pub fn arm<V: Clone + PartialEq + 'static>(binding: &Binding<V>, instance: &Instance<V>) {
    if !binding.is_computed() {
        return;
    }
    let cycle = instance.cycle(binding.property());
    drop(cycle.replace_watch(None));

    let decl = binding.decl();
    let weak = instance.downgrade();
    let watch = match (&decl.dependencies, &decl.source) {
        (Some(derive), _) => {
            let derive = Rc::clone(derive);
            let computed = Computed::new(move || weak.upgrade().map(|i| derive(&i)));
            observe(&computed, binding, instance)
        }
        (None, StreamSource::Derived(derive)) => {
            let derive = Rc::clone(derive);
            let computed = Computed::new(move || weak.upgrade().map(|i| derive(&i)));
            observe(&computed, binding, instance)
        }
        // Rejected when the declaration is built.
        (None, StreamSource::Static(_)) => return,
    };
    cycle.replace_watch(Some(watch));
}

/// Dispose the watch for `binding` on `instance`, if one is armed.
pub fn disarm<V: Clone + PartialEq + 'static>(binding: &Binding<V>, instance: &Instance<V>) {
    if let Some(cycle) = instance.existing_cycle(binding.property()) {
        drop(cycle.replace_watch(None));
    }
}

fn observe<T, V>(computed: &Computed<T>, binding: &Binding<V>, instance: &Instance<V>) -> Watch
where
    T: Clone + PartialEq + 'static,
    V: Clone + PartialEq + 'static,
{
    let binding = binding.clone();
    let weak: WeakInstance<V> = instance.downgrade();
    computed.observe(move |_| {
        let Some(instance) = weak.upgrade() else {
            return;
        };
        if instance.phase() == Phase::Unmounted {
            return;
        }
        tracing::debug!(
            message = "watch.rebind",
            instance = %instance.id(),
            property = %binding.property(),
        );
        controller::load(&binding, &instance);
    })
}
