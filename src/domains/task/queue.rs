use super::aggregate::TaskPriority;
use crate::common::TaskId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub priority: TaskPriority,
    pub task_id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then the older (smaller) id.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending task ids ordered by priority, then creation order. Entries are
/// never removed on cancellation; the scheduler discards stale ones on peek.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task_id: TaskId, priority: TaskPriority) {
        self.heap.push(QueueEntry { priority, task_id });
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.heap.peek().copied()
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_by_priority_then_creation_order() {
        let mut q = PendingQueue::new();
        q.push(1, TaskPriority::Normal);
        q.push(2, TaskPriority::Urgent);
        q.push(3, TaskPriority::Normal);
        q.push(4, TaskPriority::Low);
        q.push(5, TaskPriority::Urgent);

        let order: Vec<TaskId> = std::iter::from_fn(|| q.pop().map(|e| e.task_id)).collect();
        assert_eq!(order, vec![2, 5, 1, 3, 4]);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = PendingQueue::new();
        q.push(8, TaskPriority::High);
        assert_eq!(q.peek().map(|e| e.task_id), Some(8));
        assert_eq!(q.len(), 1);
    }
}
