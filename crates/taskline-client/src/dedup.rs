use std::collections::{HashSet, VecDeque};

use taskline_proto::NotificationId;

/// Bounded set of recently seen notification ids. A reconnect can replay a
/// push the server already delivered; this keeps the unread counter and the
/// event stream exactly-once per id within the window.
#[derive(Debug)]
pub struct RecentlySeen {
    capacity: usize,
    order: VecDeque<NotificationId>,
    seen: HashSet<NotificationId>,
}

impl RecentlySeen {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record an id; returns `true` the first time it is seen. The oldest
    /// entry is evicted once the window is full.
    pub fn insert(&mut self, id: &NotificationId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn first_insert_wins_repeat_loses() {
        let mut seen = RecentlySeen::new(8);
        let id = NotificationId::new("n1");
        assert!(seen.insert(&id));
        assert!(!seen.insert(&id));
        assert_eq!(seen.len(), 1);
    }

    #[test_timeout::timeout]
    fn eviction_is_insert_ordered() {
        let mut seen = RecentlySeen::new(2);
        let a = NotificationId::new("a");
        let b = NotificationId::new("b");
        let c = NotificationId::new("c");
        assert!(seen.insert(&a));
        assert!(seen.insert(&b));
        assert!(seen.insert(&c)); // evicts a
        assert_eq!(seen.len(), 2);
        assert!(seen.insert(&a)); // a was forgotten
        assert!(!seen.insert(&c)); // c still tracked
    }
}
