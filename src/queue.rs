//! Fixed-capacity queue that evicts its oldest entry when full.

use std::collections::VecDeque;

/// Keeps the most recent `capacity` items for diagnostics.
///
/// Nothing in the reading pipeline reads entries back.
#[derive(Debug, Clone)]
pub struct LimitedQueue<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> LimitedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        LimitedQueue {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `item`, returning the entry evicted to make room for it.
    pub fn enqueue(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
