use std::collections::VecDeque;
use std::fmt;

use foreman_api::Task;

/// Ordered holding area for submitted-but-unassigned tasks.
///
/// The queue is owned by the coordinator loop and never shared, so a plain
/// `VecDeque` is enough. The head of the queue is always the next task to be
/// dispatched (FIFO); a task whose dispatch fails goes back to the head.
///
/// Capacity is enforced by the caller through [`TaskQueue::has_room_for`];
/// `push_front` deliberately ignores it because it only returns a task that
/// was already admitted.
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    capacity: usize,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.tasks.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    /// Whether `count` more tasks fit without exceeding capacity.
    pub fn has_room_for(&self, count: usize) -> bool {
        self.tasks.len().saturating_add(count) <= self.capacity
    }

    pub fn push_back(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Return a task to the head of the queue.
    pub fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every queued task, in order.
    pub fn drain(&mut self) -> impl Iterator<Item = Task> + '_ {
        self.tasks.drain(..)
    }
}

/// Bounded record of terminal tasks. The oldest entry is dropped first.
#[derive(Debug)]
pub struct TaskHistory {
    tasks: VecDeque<Task>,
    limit: usize,
}

impl TaskHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            limit,
        }
    }

    pub fn record(&mut self, task: Task) {
        if self.limit == 0 {
            return;
        }
        while self.tasks.len() >= self.limit {
            self.tasks.pop_front();
        }
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
