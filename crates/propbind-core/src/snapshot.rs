#![forbid(unsafe_code)]

//! Named value snapshots.
//!
//! An [`InputSnapshot`] is an immutable-by-convention view of a set of named
//! values: the external inputs an instance received, its internal state at a
//! point in time, or the assignments a side-effect function asks for.

use std::collections::BTreeMap;

/// A set of named values, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSnapshot<V> {
    values: BTreeMap<String, V>,
}

impl<V> Default for InputSnapshot<V> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<V> InputSnapshot<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: V) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        self.values.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.values.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<V: PartialEq> InputSnapshot<V> {
    /// Whether `name` holds a different value in `other`.
    ///
    /// A name present on one side only counts as a difference.
    #[must_use]
    pub fn differs_at(&self, other: &Self, name: &str) -> bool {
        self.get(name) != other.get(name)
    }
}

impl<V, K: Into<String>> FromIterator<(K, V)> for InputSnapshot<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<V> IntoIterator for InputSnapshot<V> {
    type Item = (String, V);
    type IntoIter = std::collections::btree_map::IntoIter<String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn builder_and_lookup() {
        let snap = InputSnapshot::new().with("video", 3).with("volume", 7);
        assert_eq!(snap.get("video"), Some(&3));
        assert_eq!(snap.len(), 2);
        assert!(snap.contains("volume"));
        assert!(!snap.contains("missing"));
    }

    #[test]
    fn differs_at_detects_change_and_absence() {
        let prev = InputSnapshot::new().with("video", 1).with("muted", 0);
        let next = InputSnapshot::new().with("video", 2).with("muted", 0);
        assert!(prev.differs_at(&next, "video"));
        assert!(!prev.differs_at(&next, "muted"));

        let dropped = InputSnapshot::new().with("muted", 0);
        assert!(prev.differs_at(&dropped, "video"));
        assert!(!prev.differs_at(&dropped, "absent"));
    }

    #[test]
    fn names_are_sorted() {
        let snap: InputSnapshot<i32> = [("b", 1), ("a", 2), ("c", 3)].into_iter().collect();
        assert_eq!(snap.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn differs_at_is_symmetric(a in 0i32..4, b in 0i32..4) {
            let left = InputSnapshot::new().with("k", a);
            let right = InputSnapshot::new().with("k", b);
            prop_assert_eq!(left.differs_at(&right, "k"), right.differs_at(&left, "k"));
            prop_assert_eq!(left.differs_at(&right, "k"), a != b);
        }
    }
}
