#![forbid(unsafe_code)]

//! Re-bind decisions on host update notifications.
//!
//! Resolution order, fixed when the declaration is built:
//!
//! 1. an explicit predicate, if one was declared;
//! 2. otherwise a watched-input list, true iff any named input differs
//!    between the previous and current snapshots;
//! 3. otherwise never.

use std::fmt;
use std::rc::Rc;

use propbind_core::InputSnapshot;

use crate::declaration::RebindPredicate;
use crate::host::Instance;

/// Payload of an "updated" lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateNotice<V> {
    /// External inputs before the update.
    pub prev_props: InputSnapshot<V>,
    /// External inputs after the update.
    pub props: InputSnapshot<V>,
    /// Internal state before the update.
    pub prev_state: InputSnapshot<V>,
    /// Optional extra context supplied by the host.
    pub context: Option<V>,
}

impl<V> UpdateNotice<V> {
    pub fn new(prev_props: InputSnapshot<V>, props: InputSnapshot<V>) -> Self {
        Self {
            prev_props,
            props,
            prev_state: InputSnapshot::new(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_prev_state(mut self, prev_state: InputSnapshot<V>) -> Self {
        self.prev_state = prev_state;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: V) -> Self {
        self.context = Some(context);
        self
    }
}

/// When an update notification re-binds a property.
pub enum RebindTrigger<V> {
    Never,
    WatchedInputs(Vec<String>),
    Predicate(RebindPredicate<V>),
}

impl<V> Clone for RebindTrigger<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::WatchedInputs(names) => Self::WatchedInputs(names.clone()),
            Self::Predicate(p) => Self::Predicate(Rc::clone(p)),
        }
    }
}

impl<V> fmt::Debug for RebindTrigger<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::WatchedInputs(names) => f.debug_tuple("WatchedInputs").field(names).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl<V: PartialEq> RebindTrigger<V> {
    pub(crate) fn resolve(
        predicate: Option<RebindPredicate<V>>,
        watched: Option<Vec<String>>,
    ) -> Self {
        match (predicate, watched) {
            (Some(p), _) => Self::Predicate(p),
            (None, Some(names)) => Self::WatchedInputs(names),
            (None, None) => Self::Never,
        }
    }

    /// Whether `notice` requires tearing down and reloading.
    pub fn should_rebind(&self, instance: &Instance<V>, notice: &UpdateNotice<V>) -> bool {
        match self {
            Self::Never => false,
            Self::WatchedInputs(names) => names
                .iter()
                .any(|name| notice.prev_props.differs_at(&notice.props, name)),
            Self::Predicate(p) => p(instance, notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostClass;

    fn instance() -> Instance<i32> {
        HostClass::new("Player").finish().instantiate(InputSnapshot::new())
    }

    fn notice(prev: i32, next: i32) -> UpdateNotice<i32> {
        UpdateNotice::new(
            InputSnapshot::new().with("video", prev).with("volume", 1),
            InputSnapshot::new().with("video", next).with("volume", 2),
        )
    }

    #[test]
    fn never_ignores_everything() {
        let t = RebindTrigger::<i32>::resolve(None, None);
        assert!(!t.should_rebind(&instance(), &notice(1, 2)));
    }

    #[test]
    fn watched_inputs_compare_named_values_only() {
        let t = RebindTrigger::resolve(None, Some(vec!["video".to_string()]));
        let inst = instance();
        assert!(!t.should_rebind(&inst, &notice(1, 1)));
        assert!(t.should_rebind(&inst, &notice(1, 2)));
    }

    #[test]
    fn predicate_wins_over_watch_list() {
        let t = RebindTrigger::resolve(
            Some(Rc::new(|_: &Instance<i32>, n: &UpdateNotice<i32>| {
                n.props.get("volume") == Some(&2)
            })),
            Some(vec!["video".to_string()]),
        );
        assert!(matches!(t, RebindTrigger::Predicate(_)));
        assert!(t.should_rebind(&instance(), &notice(1, 1)));
    }

    #[test]
    fn predicate_receives_instance_context() {
        let inst = instance();
        let expected = inst.id();
        let t = RebindTrigger::resolve(
            Some(Rc::new(move |i: &Instance<i32>, _: &UpdateNotice<i32>| {
                i.id() == expected
            })),
            None,
        );
        assert!(t.should_rebind(&inst, &notice(0, 0)));
    }
}
