#![forbid(unsafe_code)]

//! Per-emission value processing.
//!
//! For each value a bound stream emits:
//!
//! 1. Side effects, if declared, are computed from the raw value and every
//!    returned name that is a declared property (other than
//!    [`RESERVED_SIDE_EFFECT_KEY`]) is assigned. This runs on every emission,
//!    whether or not the main value is latched.
//! 2. With an acceptance filter: once a value has been committed in the
//!    current load cycle, nothing more is committed. Otherwise the filter
//!    sees `(value, index)` and the first accepted value (or its
//!    replacement) is committed, the latch is set and the host's
//!    stop-loading hook runs.
//! 3. Without a filter, every value is committed.
//!
//! All assignments of one emission land in one [`StateStore::commit`].
//!
//! Side-effect functions run even after the latch is set; the filter is not
//! consulted again and the main commit is suppressed. A long-lived
//! subscription therefore keeps updating side-effect properties until the
//! next load cycle.
//!
//! [`StateStore::commit`]: crate::state::StateStore::commit

use crate::controller::CycleState;
use crate::declaration::{Binding, RESERVED_SIDE_EFFECT_KEY, Selection};
use crate::host::Instance;

/// What happened to the main value of one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionOutcome {
    /// Written to the bound property.
    Committed,
    /// The filter declined it.
    Rejected,
    /// A value was already committed in this load cycle; the filter was not
    /// consulted.
    Latched,
}

/// Run one emission through side effects, the filter, and the commit.
pub(crate) fn process<V: Clone + PartialEq + 'static>(
    binding: &Binding<V>,
    instance: &Instance<V>,
    cycle: &CycleState,
    value: V,
    index: usize,
) -> EmissionOutcome {
    let decl = binding.decl();
    let hooks = instance.class().hooks();

    instance.state().commit(|tx| {
        if let Some(side_effects) = &decl.side_effects {
            for (name, assigned) in side_effects(&value) {
                if name == RESERVED_SIDE_EFFECT_KEY {
                    continue;
                }
                if !tx.set(&name, assigned) {
                    tracing::trace!(
                        message = "binding.side_effect.unknown",
                        instance = %instance.id(),
                        property = %decl.property,
                        name = %name,
                    );
                }
            }
        }

        let Some(select) = &decl.select else {
            tx.set(&decl.property, value);
            return EmissionOutcome::Committed;
        };

        if cycle.is_latched() {
            return EmissionOutcome::Latched;
        }

        let committed = match select(&value, index) {
            Selection::Reject => return EmissionOutcome::Rejected,
            Selection::Accept => value,
            Selection::AcceptAs(replacement) => replacement,
        };
        tx.set(&decl.property, committed);
        cycle.latch();
        hooks.stop_loading(instance);
        EmissionOutcome::Committed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostClass, Hooks};
    use propbind_core::{InputSnapshot, Subject};
    use std::cell::Cell;
    use std::rc::Rc;

    fn run(binding: Binding<i32>, values: &[i32]) -> (Instance<i32>, Vec<EmissionOutcome>) {
        let class = HostClass::new("Probe")
            .state("count", Some(0))
            .bind(binding.clone())
            .expect("bind")
            .finish();
        let instance = class.instantiate(InputSnapshot::new());
        let cycle = instance.cycle(binding.property());
        cycle.begin();
        let outcomes = values
            .iter()
            .map(|v| process(&binding, &instance, &cycle, *v, cycle.next_index()))
            .collect();
        (instance, outcomes)
    }

    fn stream() -> propbind_core::StreamRef<i32> {
        Subject::new().stream()
    }

    #[test]
    fn without_filter_every_value_commits() {
        let binding = Binding::builder("value", stream()).build().unwrap();
        let (instance, outcomes) = run(binding, &[1, 2, 3]);
        assert_eq!(instance.get("value"), Some(3));
        assert!(outcomes.iter().all(|o| *o == EmissionOutcome::Committed));
    }

    #[test]
    fn filter_latches_first_accepted_value() {
        let binding = Binding::builder("value", stream())
            .select(|v, _| Selection::from(*v % 2 == 0))
            .build()
            .unwrap();
        let (instance, outcomes) = run(binding, &[1, 2, 3, 4]);
        assert_eq!(instance.get("value"), Some(2));
        assert_eq!(
            outcomes,
            vec![
                EmissionOutcome::Rejected,
                EmissionOutcome::Committed,
                EmissionOutcome::Latched,
                EmissionOutcome::Latched,
            ]
        );
    }

    #[test]
    fn filter_sees_emission_index() {
        let binding = Binding::builder("value", stream())
            .select(|_, index| Selection::from(index == 2))
            .build()
            .unwrap();
        let (instance, _) = run(binding, &[10, 20, 30, 40]);
        assert_eq!(instance.get("value"), Some(30));
    }

    #[test]
    fn accept_as_replaces_committed_value() {
        let binding = Binding::builder("value", stream())
            .select(|v, _| Selection::AcceptAs(v * 100))
            .build()
            .unwrap();
        let (instance, _) = run(binding, &[7]);
        assert_eq!(instance.get("value"), Some(700));
    }

    #[test]
    fn side_effects_fire_after_latch() {
        let binding = Binding::builder("value", stream())
            .select(|_, _| Selection::Accept)
            .side_effects(|v| InputSnapshot::new().with("count", *v))
            .build()
            .unwrap();
        let (instance, _) = run(binding, &[1, 2, 3]);
        assert_eq!(instance.get("value"), Some(1));
        assert_eq!(instance.get("count"), Some(3));
    }

    #[test]
    fn side_effects_skip_unknown_and_reserved_names() {
        let binding = Binding::builder("value", stream())
            .side_effects(|v| {
                InputSnapshot::new()
                    .with("count", *v)
                    .with("ghost", *v)
                    .with(RESERVED_SIDE_EFFECT_KEY, *v)
            })
            .build()
            .unwrap();
        let (instance, _) = run(binding, &[5]);
        assert_eq!(instance.get("count"), Some(5));
        assert!(!instance.state().has("ghost"));
    }

    #[test]
    fn side_effects_and_value_observed_together() {
        let binding = Binding::builder("value", stream())
            .side_effects(|v| InputSnapshot::new().with("count", v + 1))
            .build()
            .unwrap();
        let class = HostClass::new("Probe")
            .state("count", Some(0))
            .bind(binding.clone())
            .unwrap()
            .finish();
        let instance = class.instantiate(InputSnapshot::new());
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let (probe, sink) = (instance.clone(), Rc::clone(&seen));
        let _sub = instance
            .observe("count", move |_| {
                sink.borrow_mut().push((probe.get("value"), probe.get("count")));
            })
            .unwrap();

        let cycle = instance.cycle("value");
        cycle.begin();
        process(&binding, &instance, &cycle, 4, cycle.next_index());
        assert_eq!(*seen.borrow(), vec![(Some(4), Some(5))]);
    }

    #[test]
    fn stop_loading_runs_once_on_filtered_commit() {
        let stops = Rc::new(Cell::new(0));
        let s = Rc::clone(&stops);
        let binding = Binding::builder("value", stream())
            .select(|_, _| Selection::Accept)
            .build()
            .unwrap();
        let class = HostClass::new("Probe")
            .with_hooks(Hooks::new().on_stop_loading(move |_| s.set(s.get() + 1)))
            .bind(binding.clone())
            .unwrap()
            .finish();
        let instance = class.instantiate(InputSnapshot::new());
        let cycle = instance.cycle("value");
        cycle.begin();
        for v in [1, 2] {
            process(&binding, &instance, &cycle, v, cycle.next_index());
        }
        assert_eq!(stops.get(), 1);
    }
}
