#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! `WatchSet` is the ordered, de-duplicated set of vertex keys currently
//! eligible for autoscaling evaluation.
//!
//! It is realized as an intrusive doubly-linked list indexed by a
//! `HashMap<String, Node>` rather than `Vec`/`IndexSet`, so that
//! `start_watching`, `stop_watching`, and `rotate_front` are all O(1):
//! `Vec`-backed alternatives would need an O(n) shift to remove an
//! arbitrary key or to rotate while keeping the visited key at the back.

use std::collections::HashMap;

use parking_lot::RwLock;

/// A node of the intrusive doubly-linked list. `prev`/`next` are `None` at
/// the head/tail respectively.
#[derive(Debug)]
struct Node {
    prev: Option<String>,
    next: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    head: Option<String>,
    tail: Option<String>,
}

impl Inner {
    /// Appends `key` to the back of the list. No-op if already present.
    fn push_back(&mut self, key: &str) {
        if self.nodes.contains_key(key) {
            return;
        }

        let old_tail = self.tail.take();
        self.nodes.insert(
            key.to_string(),
            Node {
                prev: old_tail.clone(),
                next: None,
            },
        );

        match &old_tail {
            Some(tail_key) => {
                if let Some(tail_node) = self.nodes.get_mut(tail_key) {
                    tail_node.next = Some(key.to_string());
                }
            }
            None => self.head = Some(key.to_string()),
        }

        self.tail = Some(key.to_string());
    }

    /// Removes `key` from wherever it sits in the list. Returns whether it
    /// was present.
    fn remove(&mut self, key: &str) -> bool {
        let Some(node) = self.nodes.remove(key) else {
            return false;
        };

        match &node.prev {
            Some(prev_key) => {
                if let Some(prev_node) = self.nodes.get_mut(prev_key) {
                    prev_node.next = node.next.clone();
                }
            }
            None => self.head = node.next.clone(),
        }

        match &node.next {
            Some(next_key) => {
                if let Some(next_node) = self.nodes.get_mut(next_key) {
                    next_node.prev = node.prev.clone();
                }
            }
            None => self.tail = node.prev.clone(),
        }

        true
    }
}

/// The ordered, de-duplicated set of vertex keys (`"namespace/name"`)
/// currently watched by the autoscaler's dispatcher.
///
/// Safe to share across the dispatcher and any number of external
/// reconciler threads: reads (`contains`, `length`) take a shared lock,
/// mutations (`start_watching`, `stop_watching`, `rotate_front`) take an
/// exclusive one.
#[derive(Debug, Default)]
pub struct WatchSet {
    inner: RwLock<Inner>,
}

impl WatchSet {
    /// Creates an empty watch set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently appends `key` to the back of the watch list.
    pub fn start_watching(&self, key: impl AsRef<str>) {
        self.inner.write().push_back(key.as_ref());
    }

    /// Removes `key` if present. Idempotent; returns whether it was
    /// actually watched.
    pub fn stop_watching(&self, key: impl AsRef<str>) -> bool {
        self.inner.write().remove(key.as_ref())
    }

    /// Returns whether `key` is currently watched.
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.inner.read().nodes.contains_key(key.as_ref())
    }

    /// Returns the number of watched keys.
    pub fn length(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Atomically moves the front key to the back of the list and returns
    /// it. Returns `None` when the set is empty.
    pub fn rotate_front(&self) -> Option<String> {
        let mut inner = self.inner.write();
        let key = inner.head.clone()?;
        inner.remove(&key);
        inner.push_back(&key);
        Some(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn start_watching_is_idempotent() {
        let set = WatchSet::new();
        set.start_watching("ns/a");
        set.start_watching("ns/a");
        assert_eq!(set.length(), 1);
        assert!(set.contains("ns/a"));
    }

    #[test]
    fn stop_watching_is_idempotent() {
        let set = WatchSet::new();
        set.start_watching("ns/a");
        assert!(set.stop_watching("ns/a"));
        assert!(!set.stop_watching("ns/a"));
        assert_eq!(set.length(), 0);
    }

    #[test]
    fn rotate_front_on_empty_returns_none() {
        let set = WatchSet::new();
        assert_eq!(set.rotate_front(), None);
    }

    #[test]
    fn rotate_visits_every_key_once_per_full_cycle() {
        let set = WatchSet::new();
        for key in ["ns/a", "ns/b", "ns/c"] {
            set.start_watching(key);
        }

        let mut visited = vec![];
        for _ in 0..3 {
            visited.push(set.rotate_front().expect("non-empty"));
        }
        visited.sort();
        assert_eq!(visited, vec!["ns/a", "ns/b", "ns/c"]);

        // A second full cycle sees the exact same set again, in the same
        // relative order (fair round-robin).
        let mut second_cycle = vec![];
        for _ in 0..3 {
            second_cycle.push(set.rotate_front().expect("non-empty"));
        }
        assert_eq!(second_cycle, vec!["ns/a", "ns/b", "ns/c"]);
    }

    #[test]
    fn removing_mid_list_preserves_remaining_order() {
        let set = WatchSet::new();
        for key in ["ns/a", "ns/b", "ns/c"] {
            set.start_watching(key);
        }
        assert!(set.stop_watching("ns/b"));

        assert_eq!(set.rotate_front().as_deref(), Some("ns/a"));
        assert_eq!(set.rotate_front().as_deref(), Some("ns/c"));
        assert_eq!(set.rotate_front().as_deref(), Some("ns/a"));
    }

    #[test]
    fn removing_head_or_tail_relinks_correctly() {
        let set = WatchSet::new();
        for key in ["ns/a", "ns/b", "ns/c"] {
            set.start_watching(key);
        }

        assert!(set.stop_watching("ns/a")); // head
        assert!(set.stop_watching("ns/c")); // tail
        assert_eq!(set.length(), 1);
        assert_eq!(set.rotate_front().as_deref(), Some("ns/b"));
    }
}
