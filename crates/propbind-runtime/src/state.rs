#![forbid(unsafe_code)]

//! Observable state of one instance.
//!
//! A [`StateStore`] holds one [`Observable`] per declared property name.
//! Properties start unset (`None`) unless the host class declared an
//! initial value. Writes go through [`StateStore::commit`], which applies
//! every assignment of one [`Transaction`] under a single [`BatchScope`]:
//! dependents are notified after the last assignment, once per changed
//! property, and never observe a partial update.

use std::collections::BTreeMap;

use propbind_core::InputSnapshot;

use crate::reactive::{BatchScope, Observable, Subscription};

/// Named reactive properties of one instance.
pub struct StateStore<V> {
    cells: BTreeMap<String, Observable<Option<V>>>,
}

impl<V: std::fmt::Debug> std::fmt::Debug for StateStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("properties", &self.cells.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<V: Clone + PartialEq + 'static> StateStore<V> {
    /// Store with the given properties and their initial values.
    pub fn new(properties: impl IntoIterator<Item = (String, Option<V>)>) -> Self {
        Self {
            cells: properties
                .into_iter()
                .map(|(name, initial)| (name, Observable::new(initial)))
                .collect(),
        }
    }

    /// Whether `name` is a declared property.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    /// Current value of `name`. Tracked when read inside a derivation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<V> {
        self.cells.get(name).and_then(Observable::get)
    }

    /// Number of changes committed to `name`.
    #[must_use]
    pub fn version(&self, name: &str) -> Option<u64> {
        self.cells.get(name).map(Observable::version)
    }

    /// Call `callback` after each committed change to `name`.
    /// Returns `None` for an undeclared property.
    pub fn observe(
        &self,
        name: &str,
        callback: impl Fn(Option<&V>) + 'static,
    ) -> Option<Subscription> {
        self.cells
            .get(name)
            .map(|cell| cell.subscribe(move |value| callback(value.as_ref())))
    }

    /// Apply a group of assignments as one update.
    pub fn commit<R>(&self, f: impl FnOnce(&mut Transaction<'_, V>) -> R) -> R {
        let _scope = BatchScope::new();
        let mut tx = Transaction {
            store: self,
            applied: 0,
            skipped: Vec::new(),
        };
        f(&mut tx)
    }

    /// Current values of every property that has one.
    #[must_use]
    pub fn snapshot(&self) -> InputSnapshot<V> {
        self.cells
            .iter()
            .filter_map(|(name, cell)| cell.with(|v| v.clone()).map(|v| (name.clone(), v)))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

/// Assignments applied inside one [`StateStore::commit`].
pub struct Transaction<'a, V> {
    store: &'a StateStore<V>,
    applied: usize,
    skipped: Vec<String>,
}

impl<V: Clone + PartialEq + 'static> Transaction<'_, V> {
    /// Assign `value` to `name`. Returns `false` and records the name as
    /// skipped when the property is not declared.
    pub fn set(&mut self, name: &str, value: V) -> bool {
        match self.store.cells.get(name) {
            Some(cell) => {
                cell.set(Some(value));
                self.applied += 1;
                true
            }
            None => {
                self.skipped.push(name.to_owned());
                false
            }
        }
    }

    /// Reset `name` to unset.
    pub fn clear(&mut self, name: &str) -> bool {
        match self.store.cells.get(name) {
            Some(cell) => {
                cell.set(None);
                self.applied += 1;
                true
            }
            None => false,
        }
    }

    /// Read through the transaction (sees earlier assignments).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<V> {
        self.store.get(name)
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Names that were assigned but are not declared.
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }
}
