//! One-shot timer service (§4.1). The real event loop is a single OS thread
//! so there is no locking here; a `TimerQueue` is just a min-heap ordered by
//! expiry, with insertion order used as a tie-break so that two timers
//! scheduled for the same instant fire in scheduling order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Opaque handle returned by `TimerQueue::add`. Cancelling with a handle
/// whose timer has already fired is a documented no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry {
    id: u64,
    seq: u64,
    expiry: Instant,
    cb: Option<Box<dyn FnOnce()>>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest expiry (and, on a
        // tie, the lowest sequence number / earliest scheduling) pops first.
        other
            .expiry
            .cmp(&self.expiry)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    next_id: u64,
    next_seq: u64,
    cancelled: std::collections::HashSet<u64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `cb` to run after `delay`. The closure is owned by the
    /// queue and dropped once fired (or once cancelled).
    pub fn add(&mut self, delay: Duration, cb: impl FnOnce() + 'static) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            id,
            seq,
            expiry: Instant::now() + delay,
            cb: Some(Box::new(cb)),
        });
        TimerHandle(id)
    }

    /// Idempotent: cancelling an already-fired or already-cancelled handle
    /// is a no-op, per §4.1.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Time until the next timer expires, or `None` if the queue is empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.expiry)
    }

    /// Runs every timer whose expiry has passed, in expiry order (ties
    /// broken by scheduling order). Returns the number of callbacks that
    /// actually ran (cancelled entries are skipped silently).
    pub fn run_expired(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        while let Some(top) = self.heap.peek() {
            if top.expiry > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if let Some(cb) = entry.cb.take() {
                cb();
                ran += 1;
            }
        }
        ran
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn same_instant_fires_in_scheduling_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut q = TimerQueue::new();
        let now = Instant::now();
        // Force identical expiries by adding zero-delay timers back to back.
        let l1 = log.clone();
        q.add(Duration::from_millis(0), move || l1.borrow_mut().push(1));
        let l2 = log.clone();
        q.add(Duration::from_millis(0), move || l2.borrow_mut().push(2));
        q.run_expired(now + Duration::from_millis(1));
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn cancel_before_fire_prevents_callback() {
        let fired = Rc::new(RefCell::new(false));
        let mut q = TimerQueue::new();
        let f = fired.clone();
        let h = q.add(Duration::from_millis(0), move || *f.borrow_mut() = true);
        q.cancel(h);
        q.run_expired(Instant::now() + Duration::from_millis(1));
        assert!(!*fired.borrow());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut q = TimerQueue::new();
        let h = q.add(Duration::from_millis(0), || {});
        q.run_expired(Instant::now() + Duration::from_millis(1));
        q.cancel(h); // must not panic
    }
}
