//! Shared work queue feeding the crawl worker pool

use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed list of work items claimed one at a time by concurrent workers
///
/// Claiming is a single atomic increment, so a worker that finishes an item
/// picks up the next one immediately and each item is handed out exactly once.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claims the next item along with its position in the queue
    pub fn claim(&self) -> Option<(usize, &T)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }

    /// Items not yet claimed
    pub fn remaining(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_claims_in_order() {
        let q = WorkQueue::new(vec!["a", "b", "c"]);
        assert_eq!(q.len(), 3);
        assert_eq!(q.claim(), Some((0, &"a")));
        assert_eq!(q.claim(), Some((1, &"b")));
        assert_eq!(q.remaining(), 1);
        assert_eq!(q.claim(), Some((2, &"c")));
        assert_eq!(q.claim(), None);
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn test_empty_queue() {
        let q: WorkQueue<u32> = WorkQueue::new(vec![]);
        assert!(q.is_empty());
        assert_eq!(q.claim(), None);
    }

    #[test]
    fn test_each_item_claimed_once_across_threads() {
        let q = Arc::new(WorkQueue::new((0..1000).collect::<Vec<u32>>()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some((_, item)) = q.claim() {
                        seen.push(*item);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for item in handle.join().unwrap() {
                assert!(all.insert(item), "item {} claimed twice", item);
            }
        }
        assert_eq!(all.len(), 1000);
    }
}
