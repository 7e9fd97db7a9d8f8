//! Capacity-bounded three-state map.
//!
//! Every entry is `Possible`, `Triggered` or `Obsolete`. Only `Possible`
//! entries may change state, and only they are evicted when the stack is
//! full; eviction picks the least recently touched one.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// State of an event or rule within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Possible,
    Triggered,
    Obsolete,
}

/// Outcome of [`BoundedStack::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<K> {
    Inserted,
    /// Inserted after evicting the given `Possible` entry.
    Evicted(K),
    /// Key already present; nothing changed.
    Duplicate,
    /// Full of durable entries; the new entry was dropped.
    Rejected,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    standing: Standing,
    touched: u64,
}

/// Bounded map of `K` to `V` with per-entry [`Standing`].
#[derive(Debug, Clone)]
pub struct BoundedStack<K, V> {
    capacity: usize,
    slots: HashMap<K, Slot<V>>,
    // touch tick -> key, `Possible` entries only
    lru: BTreeMap<u64, K>,
    clock: u64,
}

impl<K, V> BoundedStack<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty stack holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: HashMap::new(),
            lru: BTreeMap::new(),
            clock: 0,
        }
    }

    /// Maximum number of tracked entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Adds a new `Possible` entry, evicting if the stack is full.
    pub fn insert(&mut self, key: K, value: V) -> Admission<K> {
        if self.slots.contains_key(&key) {
            return Admission::Duplicate;
        }

        let mut admission = Admission::Inserted;
        if self.slots.len() >= self.capacity {
            let Some((_, victim)) = self.lru.pop_first() else {
                return Admission::Rejected;
            };
            self.slots.remove(&victim);
            admission = Admission::Evicted(victim);
        }

        let touched = self.tick();
        self.lru.insert(touched, key.clone());
        self.slots.insert(
            key,
            Slot {
                value,
                standing: Standing::Possible,
                touched,
            },
        );
        admission
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|s| &s.value)
    }

    #[must_use]
    pub fn standing(&self, key: &K) -> Option<Standing> {
        self.slots.get(key).map(|s| s.standing)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Key the next eviction would remove, if any.
    #[must_use]
    pub fn peek_victim(&self) -> Option<&K> {
        self.lru.first_key_value().map(|(_, k)| k)
    }

    /// Marks a `Possible` entry as recently used.
    pub fn touch(&mut self, key: &K) {
        let now = self.tick();
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };
        if slot.standing != Standing::Possible {
            return;
        }
        self.lru.remove(&slot.touched);
        slot.touched = now;
        self.lru.insert(now, key.clone());
    }

    /// Moves a `Possible` entry to `to`.
    ///
    /// Returns the entry if it moved, `None` if it was absent or already
    /// terminal. Moving to `Possible` is always a no-op.
    pub fn transition(&mut self, key: &K, to: Standing) -> Option<&V> {
        if to == Standing::Possible {
            return None;
        }
        let slot = self.slots.get_mut(key)?;
        if slot.standing != Standing::Possible {
            return None;
        }
        self.lru.remove(&slot.touched);
        slot.standing = to;
        Some(&slot.value)
    }

    /// Keys currently in `standing`.
    pub fn keys_in(&self, standing: Standing) -> impl Iterator<Item = &K> + '_ {
        self.slots
            .iter()
            .filter(move |(_, s)| s.standing == standing)
            .map(|(k, _)| k)
    }

    /// Number of entries currently in `standing`.
    #[must_use]
    pub fn count_in(&self, standing: Standing) -> usize {
        match standing {
            Standing::Possible => self.lru.len(),
            _ => self.keys_in(standing).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_way() {
        let mut stack = BoundedStack::new(4);
        stack.insert("a", 1);
        assert_eq!(stack.standing(&"a"), Some(Standing::Possible));
        assert_eq!(stack.transition(&"a", Standing::Triggered), Some(&1));
        assert_eq!(stack.transition(&"a", Standing::Obsolete), None);
        assert_eq!(stack.transition(&"a", Standing::Triggered), None);
        assert_eq!(stack.standing(&"a"), Some(Standing::Triggered));
        assert_eq!(stack.transition(&"missing", Standing::Obsolete), None);
        assert_eq!(stack.transition(&"a", Standing::Possible), None);
    }

    #[test]
    fn evicts_least_recently_touched_possible_entry() {
        let mut stack = BoundedStack::new(3);
        stack.insert("a", 1);
        stack.insert("b", 2);
        stack.insert("c", 3);
        stack.touch(&"a");
        stack.transition(&"b", Standing::Triggered);

        assert_eq!(stack.insert("d", 4), Admission::Evicted("c"));
        assert!(!stack.contains(&"c"));
        assert_eq!(stack.insert("e", 5), Admission::Evicted("a"));
        assert_eq!(stack.standing(&"b"), Some(Standing::Triggered));
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn rejects_when_only_durable_entries_remain() {
        let mut stack = BoundedStack::new(2);
        stack.insert("a", 1);
        stack.insert("b", 2);
        stack.transition(&"a", Standing::Triggered);
        stack.transition(&"b", Standing::Obsolete);
        assert_eq!(stack.insert("c", 3), Admission::Rejected);
        assert_eq!(stack.insert("a", 9), Admission::Duplicate);
        assert_eq!(stack.get(&"a"), Some(&1));
        assert_eq!(stack.count_in(Standing::Possible), 0);
        assert_eq!(stack.count_in(Standing::Obsolete), 1);
    }
}
