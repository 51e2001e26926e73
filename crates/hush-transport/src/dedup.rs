//! Duplicate suppression for at-least-once relay delivery.

use std::collections::{HashSet, VecDeque};

/// Default number of event ids remembered per stream.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Remembers the most recent `capacity` event ids and reports whether an id
/// is being seen for the first time.
///
/// Not thread-safe; each subscription owns one.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `id`; returns `false` if it was already in the window.
    pub fn first_sighting(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_duplicates_suppressed() {
        let mut w = DedupWindow::new(8);
        assert!(w.first_sighting("a"));
        assert!(!w.first_sighting("a"));
        assert!(w.first_sighting("b"));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut w = DedupWindow::new(2);
        assert!(w.first_sighting("a"));
        assert!(w.first_sighting("b"));
        assert!(w.first_sighting("c"));
        // "a" fell out of the window
        assert!(w.first_sighting("a"));
        assert!(!w.first_sighting("c"));
    }

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            cap in 1usize..32,
            ids in proptest::collection::vec("[a-f]{1,3}", 0..200)
        ) {
            let mut w = DedupWindow::new(cap);
            for id in &ids {
                w.first_sighting(id);
                prop_assert!(w.len() <= cap);
            }
        }
    }
}
