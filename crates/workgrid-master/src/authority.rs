//! Master-side authorities: the single source of truth for each
//! primitive's state and waiter queue. Authorities are plain state
//! machines; the dispatcher owns them and performs the grants and
//! deliveries they decide on.

use std::collections::VecDeque;

use workgrid_protocol::{Origin, Value};

/// Lock state: unheld, or held with a FIFO waiter queue.
///
/// `release` deliberately does not check who the holder is, matching the
/// framework's token-passing behavior.
#[derive(Debug, Default)]
pub struct LockAuthority {
    locked: bool,
    waiters: VecDeque<Origin>,
}

impl LockAuthority {
    /// Returns the origin to grant immediately, or queues the requester.
    pub fn acquire(&mut self, requester: Origin) -> Option<Origin> {
        if self.locked {
            self.waiters.push_back(requester);
            None
        } else {
            self.locked = true;
            Some(requester)
        }
    }

    /// Returns the next waiter to grant, or unlocks.
    pub fn release(&mut self) -> Option<Origin> {
        match self.waiters.pop_front() {
            Some(next) => Some(next),
            None => {
                self.locked = false;
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Counting-semaphore state: available permits plus a FIFO waiter queue.
#[derive(Debug)]
pub struct SemaphoreAuthority {
    value: u64,
    waiters: VecDeque<Origin>,
}

impl SemaphoreAuthority {
    pub fn new(value: u64) -> Self {
        SemaphoreAuthority {
            value,
            waiters: VecDeque::new(),
        }
    }

    pub fn acquire(&mut self, requester: Origin) -> Option<Origin> {
        if self.value > 0 {
            self.value -= 1;
            Some(requester)
        } else {
            self.waiters.push_back(requester);
            None
        }
    }

    pub fn release(&mut self) -> Option<Origin> {
        match self.waiters.pop_front() {
            Some(next) => Some(next),
            None => {
                self.value += 1;
                None
            }
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

/// FIFO queue state: pending items and pending getters. After every
/// dispatcher step at most one of the two is non-empty.
#[derive(Debug, Default)]
pub struct QueueAuthority {
    items: VecDeque<Value>,
    waiters: VecDeque<Origin>,
}

impl QueueAuthority {
    pub fn push_item(&mut self, item: Value) {
        self.items.push_back(item);
    }

    pub fn push_waiter(&mut self, waiter: Origin) {
        self.waiters.push_back(waiter);
    }

    /// Pop the next (waiter, item) pair to deliver, oldest of each first.
    pub fn pop_delivery(&mut self) -> Option<(Origin, Value)> {
        if self.items.is_empty() || self.waiters.is_empty() {
            return None;
        }
        let waiter = self.waiters.pop_front()?;
        let item = self.items.pop_front()?;
        Some((waiter, item))
    }

    /// Return an undeliverable item to the head of the line so the next
    /// waiter receives it.
    pub fn requeue_item(&mut self, item: Value) {
        self.items.push_front(item);
    }

    pub fn pending_items(&self) -> usize {
        self.items.len()
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    const W0: Origin = Origin::Worker(0);
    const W1: Origin = Origin::Worker(1);
    const W2: Origin = Origin::Worker(2);

    #[test]
    fn lock_grants_first_acquirer_immediately() {
        let mut lock = LockAuthority::default();
        assert_eq!(lock.acquire(W0), Some(W0));
        assert!(lock.is_locked());
    }

    #[test]
    fn lock_waiters_are_served_fifo() {
        let mut lock = LockAuthority::default();
        lock.acquire(Origin::Master);
        assert_eq!(lock.acquire(W0), None);
        assert_eq!(lock.acquire(W1), None);
        assert_eq!(lock.acquire(W2), None);

        // Releases grant waiters strictly in enqueue order.
        assert_eq!(lock.release(), Some(W0));
        assert_eq!(lock.release(), Some(W1));
        assert_eq!(lock.release(), Some(W2));
        assert!(lock.is_locked());

        assert_eq!(lock.release(), None);
        assert!(!lock.is_locked());
    }

    #[test]
    fn lock_release_without_holder_check() {
        let mut lock = LockAuthority::default();
        lock.acquire(W0);
        lock.acquire(W1);
        // The releaser is never verified; W1 is granted regardless of who
        // calls release.
        assert_eq!(lock.release(), Some(W1));
    }

    #[test]
    fn semaphore_capacity_is_bounded() {
        let mut sem = SemaphoreAuthority::new(2);
        assert_eq!(sem.acquire(W0), Some(W0));
        assert_eq!(sem.acquire(W1), Some(W1));
        assert_eq!(sem.value(), 0);

        // Third acquirer waits.
        assert_eq!(sem.acquire(W2), None);

        // A release goes straight to the head waiter, not the counter.
        assert_eq!(sem.release(), Some(W2));
        assert_eq!(sem.value(), 0);

        // With no waiters releases bank permits again.
        assert_eq!(sem.release(), None);
        assert_eq!(sem.release(), None);
        assert_eq!(sem.value(), 2);
    }

    #[test]
    fn semaphore_zero_initial_blocks_all() {
        let mut sem = SemaphoreAuthority::new(0);
        assert_eq!(sem.acquire(W0), None);
        assert_eq!(sem.release(), Some(W0));
    }

    #[test]
    fn queue_delivers_in_put_order() {
        let mut queue = QueueAuthority::default();
        queue.push_item(json!(1));
        queue.push_item(json!(2));
        queue.push_waiter(W0);
        queue.push_waiter(W1);

        assert_eq!(queue.pop_delivery(), Some((W0, json!(1))));
        assert_eq!(queue.pop_delivery(), Some((W1, json!(2))));
        assert_eq!(queue.pop_delivery(), None);
    }

    #[test]
    fn queue_never_holds_both_items_and_waiters() {
        let mut queue = QueueAuthority::default();
        queue.push_item(json!("a"));
        queue.push_waiter(Origin::Master);
        while queue.pop_delivery().is_some() {}

        assert!(queue.pending_items() == 0 || queue.pending_waiters() == 0);
    }

    #[test]
    fn queue_requeues_undeliverable_items_at_front() {
        let mut queue = QueueAuthority::default();
        queue.push_item(json!(1));
        queue.push_item(json!(2));
        queue.push_waiter(W0);
        queue.push_waiter(W1);

        let (dead_waiter, item) = queue.pop_delivery().unwrap();
        assert_eq!(dead_waiter, W0);
        queue.requeue_item(item);

        // The next waiter receives the item the dead one missed.
        assert_eq!(queue.pop_delivery(), Some((W1, json!(1))));
    }
}
