//! Priority-ordered operation queues with bounded concurrency.
//!
//! The pipeline runs three of these: data loading, decoding and processing.
//! Operations are identified by the slot of the task that owns them, and a
//! task has at most one operation per queue.
//!
//! ```text
//!   enqueue ──► pending (highest priority first, FIFO within a priority)
//!                  │ next_ready() while running < max_concurrent
//!                  ▼
//!               running ──► finish() / remove()
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use tracing::trace;

use crate::priority::Priority;

/// Which work queue an operation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    DataLoading,
    Decoding,
    Processing,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::DataLoading => f.write_str("data_loading"),
            QueueKind::Decoding => f.write_str("decoding"),
            QueueKind::Processing => f.write_str("processing"),
        }
    }
}

/// Depth snapshot of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    /// Most operations ever running at once
    pub peak_running: usize,
    pub started: u64,
}

type Order = (Reverse<Priority>, u64);

pub(crate) struct OperationQueue<T> {
    kind: QueueKind,
    max_concurrent: usize,
    pending: BTreeMap<Order, T>,
    index: HashMap<T, Order>,
    running: HashSet<T>,
    sequence: u64,
    peak_running: usize,
    started: u64,
}

impl<T> OperationQueue<T>
where
    T: Copy + Eq + Hash,
{
    pub fn new(kind: QueueKind, max_concurrent: usize) -> Self {
        Self {
            kind,
            max_concurrent: max_concurrent.max(1),
            pending: BTreeMap::new(),
            index: HashMap::new(),
            running: HashSet::new(),
            sequence: 0,
            peak_running: 0,
            started: 0,
        }
    }

    /// Adds an operation. Returns false if it is already pending or running.
    pub fn enqueue(&mut self, item: T, priority: Priority) -> bool {
        if self.index.contains_key(&item) || self.running.contains(&item) {
            return false;
        }
        let order = (Reverse(priority), self.sequence);
        self.sequence += 1;
        self.pending.insert(order, item);
        self.index.insert(item, order);
        true
    }

    /// Moves a pending operation to its new priority. Submission order is
    /// kept, so it stays FIFO among operations of the same priority.
    pub fn set_priority(&mut self, item: T, priority: Priority) {
        let Some(order) = self.index.get_mut(&item) else {
            return;
        };
        if order.0 == Reverse(priority) {
            return;
        }
        self.pending.remove(order);
        order.0 = Reverse(priority);
        self.pending.insert(*order, item);
    }

    /// Pops the next operation if a concurrency slot is free.
    pub fn next_ready(&mut self) -> Option<(T, Priority)> {
        if self.running.len() >= self.max_concurrent {
            return None;
        }
        let ((Reverse(priority), _), item) = self.pending.pop_first()?;
        self.index.remove(&item);
        self.running.insert(item);
        self.peak_running = self.peak_running.max(self.running.len());
        self.started += 1;
        trace!(
            queue = %self.kind,
            priority = priority.as_str(),
            running = self.running.len(),
            pending = self.pending.len(),
            "Operation started"
        );
        Some((item, priority))
    }

    /// Marks a running operation as done. Returns false if it was not
    /// running.
    pub fn finish(&mut self, item: T) -> bool {
        self.running.remove(&item)
    }

    /// Drops an operation whether pending or running.
    pub fn remove(&mut self, item: T) -> bool {
        self.remove_pending(item) || self.running.remove(&item)
    }

    /// Drops an operation that has not started yet. A running operation
    /// keeps its slot until [`finish`](Self::finish).
    pub fn remove_pending(&mut self, item: T) -> bool {
        match self.index.remove(&item) {
            Some(order) => self.pending.remove(&order).is_some(),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self, item: T) -> bool {
        self.running.contains(&item)
    }

    #[cfg(test)]
    pub fn is_pending(&self, item: T) -> bool {
        self.index.contains_key(&item)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            running: self.running.len(),
            peak_running: self.peak_running,
            started: self.started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(queue: &mut OperationQueue<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some((item, _)) = queue.next_ready() {
            out.push(item);
            queue.finish(item);
        }
        out
    }

    #[test]
    fn test_highest_priority_first_then_fifo() {
        let mut queue = OperationQueue::new(QueueKind::Decoding, 1);
        queue.enqueue(1, Priority::Normal);
        queue.enqueue(2, Priority::High);
        queue.enqueue(3, Priority::Normal);
        queue.enqueue(4, Priority::VeryLow);
        queue.enqueue(5, Priority::High);

        assert_eq!(drain(&mut queue), vec![2, 5, 1, 3, 4]);
    }

    #[test]
    fn test_concurrency_limit() {
        let mut queue = OperationQueue::new(QueueKind::Processing, 2);
        for i in 0..4 {
            queue.enqueue(i, Priority::Normal);
        }

        assert!(queue.next_ready().is_some());
        assert!(queue.next_ready().is_some());
        assert!(queue.next_ready().is_none());

        assert!(queue.finish(0));
        assert_eq!(queue.next_ready().map(|(i, _)| i), Some(2));
        assert_eq!(queue.stats().peak_running, 2);
    }

    #[test]
    fn test_set_priority_reorders_pending() {
        let mut queue = OperationQueue::new(QueueKind::DataLoading, 1);
        queue.enqueue(1, Priority::Normal);
        queue.enqueue(2, Priority::Normal);
        queue.enqueue(3, Priority::Normal);

        queue.set_priority(3, Priority::VeryHigh);
        assert_eq!(drain(&mut queue), vec![3, 1, 2]);
    }

    #[test]
    fn test_remove_pending_and_running() {
        let mut queue = OperationQueue::new(QueueKind::DataLoading, 1);
        queue.enqueue(1, Priority::Normal);
        queue.enqueue(2, Priority::Normal);

        let (running, _) = queue.next_ready().unwrap();
        assert!(queue.remove(2));
        assert!(!queue.is_pending(2));
        assert!(queue.remove(running));
        assert!(!queue.is_running(running));
        assert!(queue.next_ready().is_none());
    }

    #[test]
    fn test_remove_pending_keeps_running_slot() {
        let mut queue = OperationQueue::new(QueueKind::Decoding, 1);
        queue.enqueue(1, Priority::Normal);
        queue.enqueue(2, Priority::Normal);
        queue.enqueue(3, Priority::Normal);

        let (running, _) = queue.next_ready().unwrap();
        assert!(!queue.remove_pending(running));
        assert!(queue.is_running(running));
        assert!(queue.remove_pending(2));

        // The slot stays taken until the running operation reports back
        assert!(queue.next_ready().is_none());
        assert!(queue.finish(running));
        assert_eq!(queue.next_ready().map(|(i, _)| i), Some(3));
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let mut queue = OperationQueue::new(QueueKind::Decoding, 1);
        assert!(queue.enqueue(1, Priority::Normal));
        assert!(!queue.enqueue(1, Priority::High));
        queue.next_ready();
        assert!(!queue.enqueue(1, Priority::High));
    }

    proptest! {
        #[test]
        fn prop_pops_in_priority_order(priorities in proptest::collection::vec(0usize..5, 1..40)) {
            let mut queue = OperationQueue::new(QueueKind::Decoding, 1);
            for (i, p) in priorities.iter().enumerate() {
                queue.enqueue(i as u32, Priority::ALL[*p]);
            }

            let order = drain(&mut queue);
            prop_assert_eq!(order.len(), priorities.len());
            for pair in order.windows(2) {
                let (a, b) = (pair[0] as usize, pair[1] as usize);
                prop_assert!(priorities[a] >= priorities[b]);
                if priorities[a] == priorities[b] {
                    prop_assert!(a < b);
                }
            }
        }
    }
}
