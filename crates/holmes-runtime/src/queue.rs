use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Counters describing how the queue has been drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Drains that actually ran.
    pub drains: u64,
    /// Drain calls refused because another drain was active.
    pub refused: u64,
    pub processed: u64,
    /// Highest number of drains observed running at once.
    pub peak_concurrent: u32,
}

/// Ordered, append-only buffer of pending events with an exclusive drain.
///
/// Producers only append. Insertion order is processing order. A drain that
/// is asked for while another one is running is refused, so events appended
/// from inside a step are picked up by the drain already in progress.
#[derive(Debug)]
pub struct DispatchQueue<E> {
    pending: RefCell<VecDeque<E>>,
    active: Cell<u32>,
    stats: Cell<DrainStats>,
}

impl<E> Default for DispatchQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> DispatchQueue<E> {
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(VecDeque::new()),
            active: Cell::new(0),
            stats: Cell::new(DrainStats::default()),
        }
    }

    /// Append to the tail. Returns `true` when no drain is running and the
    /// caller has to start one.
    pub fn enqueue(&self, event: E) -> bool {
        self.pending.borrow_mut().push_back(event);
        !self.is_draining()
    }

    pub fn is_draining(&self) -> bool {
        self.active.get() > 0
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    pub fn stats(&self) -> DrainStats {
        self.stats.get()
    }

    /// Hand events to `step` one at a time, head first, until the queue is
    /// empty. Follow-up events returned by `step` go to the tail. Returns the
    /// number of events processed, or 0 when refused.
    pub fn drain<F>(&self, mut step: F) -> usize
    where
        F: FnMut(E) -> Vec<E>,
    {
        if self.is_draining() {
            self.update_stats(|stats| stats.refused += 1);
            return 0;
        }
        let _guard = DrainGuard::enter(self);

        let mut processed = 0;
        loop {
            // release the borrow before stepping so `step` may enqueue
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            let follow_ups = step(event);
            processed += 1;
            self.update_stats(|stats| stats.processed += 1);
            if !follow_ups.is_empty() {
                self.pending.borrow_mut().extend(follow_ups);
            }
        }
        processed
    }

    fn update_stats(&self, apply: impl FnOnce(&mut DrainStats)) {
        let mut stats = self.stats.get();
        apply(&mut stats);
        self.stats.set(stats);
    }
}

struct DrainGuard<'a, E> {
    queue: &'a DispatchQueue<E>,
}

impl<'a, E> DrainGuard<'a, E> {
    fn enter(queue: &'a DispatchQueue<E>) -> Self {
        let active = queue.active.get() + 1;
        queue.active.set(active);
        queue.update_stats(|stats| {
            stats.drains += 1;
            stats.peak_concurrent = stats.peak_concurrent.max(active);
        });
        Self { queue }
    }
}

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        self.queue.active.set(self.queue.active.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processes_in_insertion_order() {
        let queue = DispatchQueue::new();
        assert!(queue.enqueue(1));
        assert!(queue.enqueue(2));
        assert!(queue.enqueue(3));

        let mut seen = Vec::new();
        let processed = queue.drain(|event| {
            seen.push(event);
            Vec::new()
        });
        assert_eq!(processed, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(!queue.is_draining());
    }

    #[test]
    fn follow_ups_land_after_everything_already_queued() {
        let queue = DispatchQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");

        let mut seen = Vec::new();
        queue.drain(|event| {
            seen.push(event);
            if event == "a" { vec!["a2"] } else { Vec::new() }
        });
        assert_eq!(seen, vec!["a", "b", "a2"]);
    }

    #[test]
    fn nested_drain_is_refused_and_reentrant_enqueue_is_picked_up() {
        let queue = DispatchQueue::new();
        queue.enqueue(1);

        let mut seen = Vec::new();
        let mut nested = Vec::new();
        queue.drain(|event| {
            seen.push(event);
            if event == 1 {
                assert!(!queue.enqueue(10));
                nested.push(queue.drain(|_| Vec::new()));
            }
            Vec::new()
        });

        assert_eq!(seen, vec![1, 10]);
        assert_eq!(nested, vec![0]);
        let stats = queue.stats();
        assert_eq!(stats.drains, 1);
        assert_eq!(stats.refused, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.peak_concurrent, 1);
    }

    #[test]
    fn enqueue_after_drain_requests_a_new_one() {
        let queue = DispatchQueue::new();
        queue.enqueue(());
        queue.drain(|_| Vec::new());
        assert!(queue.enqueue(()));
        assert_eq!(queue.drain(|_| Vec::new()), 1);
        assert_eq!(queue.stats().drains, 2);
    }
}
