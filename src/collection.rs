//! Node collections.
//!
//! A `NodeCollection` is the observable set a pipeline stage reduces over.
//! It keeps its members in insertion order (which makes `BaseSet` ties
//! deterministic), ignores duplicate adds and missing removes, and reports
//! every effective mutation as a `CollectionDelta`.

use crate::events::{CollectionCallback, SubscriptionId};
use indexmap::IndexSet;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;

/// Members added to and removed from a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionDelta<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T: PartialEq> CollectionDelta<T> {
    pub fn added(member: T) -> Self {
        Self {
            added: vec![member],
            removed: Vec::new(),
        }
    }

    pub fn removed(member: T) -> Self {
        Self {
            added: Vec::new(),
            removed: vec![member],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Fold a later delta into this one. Adding and then removing the same
    /// member (or the reverse) cancels out.
    pub fn merge(&mut self, later: CollectionDelta<T>) {
        for member in later.added {
            if let Some(pos) = self.removed.iter().position(|m| *m == member) {
                self.removed.remove(pos);
            } else if !self.added.contains(&member) {
                self.added.push(member);
            }
        }
        for member in later.removed {
            if let Some(pos) = self.added.iter().position(|m| *m == member) {
                self.added.remove(pos);
            } else if !self.removed.contains(&member) {
                self.removed.push(member);
            }
        }
    }
}

/// An insertion-ordered observable set.
///
/// # Examples
///
/// ```rust
/// use statgraph::NodeCollection;
///
/// let mut collection = NodeCollection::new();
/// assert!(collection.add(1).is_some());
/// assert!(collection.add(1).is_none()); // already present, no delta
/// assert_eq!(collection.len(), 1);
///
/// let delta = collection.remove(&1).unwrap();
/// assert_eq!(delta.removed, vec![1]);
/// assert!(collection.is_empty());
/// ```
pub struct NodeCollection<T> {
    members: IndexSet<T>,
    pub(crate) subscribers: Vec<(SubscriptionId, CollectionCallback)>,
}

impl<T: Hash + Eq + Clone> NodeCollection<T> {
    pub fn new() -> Self {
        Self {
            members: IndexSet::new(),
            subscribers: Vec::new(),
        }
    }

    /// Add a member. Returns the delta, or `None` if it was already present.
    pub fn add(&mut self, member: T) -> Option<CollectionDelta<T>> {
        if self.members.insert(member.clone()) {
            Some(CollectionDelta::added(member))
        } else {
            None
        }
    }

    /// Remove a member. Returns the delta, or `None` if it was absent.
    ///
    /// The relative order of the remaining members is preserved.
    pub fn remove(&mut self, member: &T) -> Option<CollectionDelta<T>> {
        if self.members.shift_remove(member) {
            Some(CollectionDelta::removed(member.clone()))
        } else {
            None
        }
    }

    pub fn contains(&self, member: &T) -> bool {
        self.members.contains(member)
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Hash + Eq + Clone> Default for NodeCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCollection")
            .field("members", &self.members)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_add_is_noop() {
        let mut collection = NodeCollection::new();
        let first = collection.add(("life", 1));
        let second = collection.add(("life", 1));
        assert_eq!(first, Some(CollectionDelta::added(("life", 1))));
        assert_eq!(second, None);
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut collection: NodeCollection<u32> = NodeCollection::new();
        assert_eq!(collection.remove(&7), None);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut collection = NodeCollection::new();
        collection.add(3);
        collection.add(1);
        collection.add(2);
        collection.remove(&1);
        let members: Vec<_> = collection.iter().copied().collect();
        assert_eq!(members, vec![3, 2]);
    }

    #[test]
    fn test_delta_merge_cancels() {
        let mut delta = CollectionDelta::added(1);
        delta.merge(CollectionDelta::added(2));
        delta.merge(CollectionDelta::removed(1));
        assert_eq!(delta.added, vec![2]);
        assert!(delta.removed.is_empty());

        let mut delta = CollectionDelta::removed(5);
        delta.merge(CollectionDelta::added(5));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_merge_deduplicates() {
        let mut delta = CollectionDelta::added(1);
        delta.merge(CollectionDelta::added(1));
        assert_eq!(delta.added, vec![1]);
    }
}
