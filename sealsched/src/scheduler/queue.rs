//! Pending request queue
//!
//! Owned exclusively by the scheduler loop, so it carries no lock.

use std::cmp::{Ordering, Reverse};

use crate::domain::{Priority, SchedId};

use super::request::WorkerRequest;

/// Ordering key: higher priority first, then earlier submission
fn key(req: &WorkerRequest) -> (Reverse<Priority>, u64) {
    (Reverse(req.priority()), req.seq)
}

fn order(a: &WorkerRequest, b: &WorkerRequest) -> Ordering {
    key(a).cmp(&key(b))
}

/// Requests waiting to be bound, kept sorted by priority then submission
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: Vec<WorkerRequest>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly submitted request, stamping its sequence number
    pub fn push(&mut self, mut req: WorkerRequest) {
        self.next_seq += 1;
        req.seq = self.next_seq;
        self.insert(req);
    }

    /// Put back a request that was bound but never started
    ///
    /// Keeps the original sequence number so it regains its old place.
    pub fn requeue(&mut self, req: WorkerRequest) {
        if req.seq == 0 {
            self.push(req);
        } else {
            self.insert(req);
        }
    }

    fn insert(&mut self, req: WorkerRequest) {
        let at = self.requests.partition_point(|r| order(r, &req) != Ordering::Greater);
        self.requests.insert(at, req);
    }

    pub fn peek(&self) -> Option<&WorkerRequest> {
        self.requests.first()
    }

    pub fn pop(&mut self) -> Option<WorkerRequest> {
        if self.requests.is_empty() {
            None
        } else {
            Some(self.requests.remove(0))
        }
    }

    /// Remove a request by scheduling id
    pub fn remove(&mut self, sched_id: SchedId) -> Option<WorkerRequest> {
        let at = self.requests.iter().position(|r| r.sched_id() == sched_id)?;
        Some(self.requests.remove(at))
    }

    pub fn remove_at(&mut self, index: usize) -> Option<WorkerRequest> {
        (index < self.requests.len()).then(|| self.requests.remove(index))
    }

    /// Remove every request matching `pred`, preserving order
    pub fn drain_where(&mut self, mut pred: impl FnMut(&WorkerRequest) -> bool) -> Vec<WorkerRequest> {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.requests.len());
        for req in self.requests.drain(..) {
            if pred(&req) {
                drained.push(req);
            } else {
                kept.push(req);
            }
        }
        self.requests = kept;
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Take every request out, in order
    pub fn drain(&mut self) -> Vec<WorkerRequest> {
        std::mem::take(&mut self.requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::request::testing::request;
    use proptest::prelude::*;

    fn sectors(queue: &RequestQueue) -> Vec<u64> {
        queue.iter().map(|r| r.sector().id.number).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = RequestQueue::new();
        queue.push(request(0, 1).0);
        queue.push(request(5, 2).0);
        queue.push(request(0, 3).0);
        queue.push(request(5, 4).0);
        queue.push(request(-1, 5).0);

        assert_eq!(sectors(&queue), vec![2, 4, 1, 3, 5]);
        assert_eq!(queue.peek().map(|r| r.sector().id.number), Some(2));
        assert_eq!(queue.pop().map(|r| r.sector().id.number), Some(2));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = RequestQueue::new();
        let (a, _rx_a) = request(0, 1);
        let (b, _rx_b) = request(0, 2);
        let id = b.sched_id();
        queue.push(a);
        queue.push(b);

        assert!(queue.remove(SchedId::new()).is_none());
        assert_eq!(queue.len(), 2);

        let removed = queue.remove(id).unwrap();
        assert_eq!(removed.sector().id.number, 2);
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(id).is_none());
    }

    #[test]
    fn test_requeue_keeps_place() {
        let mut queue = RequestQueue::new();
        queue.push(request(1, 1).0);
        queue.push(request(1, 2).0);
        queue.push(request(1, 3).0);

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        queue.push(request(1, 4).0);

        // Put back out of order; sequence numbers restore submission order
        queue.requeue(second);
        queue.requeue(first);
        assert_eq!(sectors(&queue), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_drain_where_and_remove_at() {
        let mut queue = RequestQueue::new();
        for n in 1..=6 {
            queue.push(request(0, n).0);
        }
        let even = queue.drain_where(|r| r.sector().id.number % 2 == 0);
        assert_eq!(even.iter().map(|r| r.sector().id.number).collect::<Vec<_>>(), vec![2, 4, 6]);
        assert_eq!(sectors(&queue), vec![1, 3, 5]);

        assert!(queue.remove_at(7).is_none());
        assert_eq!(queue.remove_at(1).unwrap().sector().id.number, 3);
        assert_eq!(sectors(&queue), vec![1, 5]);
    }

    proptest! {
        #[test]
        fn prop_queue_is_sorted(priorities in proptest::collection::vec(-5i32..5, 0..40)) {
            let mut queue = RequestQueue::new();
            for (i, p) in priorities.iter().enumerate() {
                queue.push(request(*p, i as u64).0);
            }

            let items: Vec<_> = queue.iter().map(|r| (r.priority(), r.seq())).collect();
            for pair in items.windows(2) {
                let (pa, sa) = pair[0];
                let (pb, sb) = pair[1];
                prop_assert!(pa > pb || (pa == pb && sa < sb));
            }
            prop_assert_eq!(queue.len(), priorities.len());
        }
    }
}
