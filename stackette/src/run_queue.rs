//! FIFO of tasks ready to run.

use heapless::Deque;

use crate::{Error, task::MAX_NUM_TASKS, task::TaskHandle};

/// Strict arrival order, no priorities. A task appears at most once.
#[derive(Debug)]
pub struct RunQueue {
    queue: Deque<TaskHandle, MAX_NUM_TASKS>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    pub fn push_back(&mut self, task: TaskHandle) -> Result<(), Error> {
        if self.contains(task) {
            // Enqueuing twice would resume the task while it is already running
            return Err(Error::AlreadyQueued);
        }

        self.queue.push_back(task).or(Err(Error::TaskFull))
    }

    pub fn pop_front(&mut self) -> Option<TaskHandle> {
        self.queue.pop_front()
    }

    pub fn contains(&self, task: TaskHandle) -> bool {
        self.queue.iter().any(|queued| *queued == task)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskHandle> {
        self.queue.iter()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
