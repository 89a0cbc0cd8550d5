//! Time management and sleeping.
//!
//! Time is represented as the number of ticks since the scheduler was initialized.
//! The architecture crate advances it by calling [`tick`] from its timer interrupt.
//! Sleeping tasks wait in a heap based queue, which is a variation of Scheme 3 described in the following paper:
//!     G. Varghese and T. Lauck, “Hashed and hierarchical timing wheels: data structures for the efficient implementation of a timer facility,” in Proceedings of the eleventh ACM Symposium on Operating systems principles - SOSP ’87, Austin, Texas, United States, 1987.

use core::sync::atomic::Ordering;

use heapless::{BinaryHeap, binary_heap::Min};
use portable_atomic::AtomicU64;

use crate::{
    Error,
    scheduler,
    task::{MAX_NUM_TASKS, TaskHandle},
};

static TIME: AtomicU64 = AtomicU64::new(0);

pub(crate) fn reset() {
    TIME.store(0, Ordering::SeqCst);
}

/// Advances the clock by one tick. Called by the architecture crate, usually from an interrupt handler.
///
/// Only the clock moves here; sleeping tasks are woken by the scheduler loop.
pub fn tick() {
    TIME.fetch_add(1, Ordering::SeqCst);
}

/// Retrieves current time (in ticks).
pub fn current_time() -> u64 {
    TIME.load(Ordering::SeqCst)
}

/// Blocks the current task for `ticks` ticks.
///
/// `sleep(0)` still goes through the scheduler, letting every other runnable task go first.
pub fn sleep(ticks: u64) -> Result<(), Error> {
    sleep_until(current_time().saturating_add(ticks))
}

/// Blocks the current task until the specified time.
pub fn sleep_until(time: u64) -> Result<(), Error> {
    scheduler::suspend_until(time)
}

#[derive(Clone, Copy, Debug)]
struct SleepEntry {
    time: u64,
    /// Insertion counter, so that equal deadlines wake in FIFO order.
    seq: u64,
    task: TaskHandle,
}

impl SleepEntry {
    fn key(&self) -> (u64, u64) {
        (self.time, self.seq)
    }
}

impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Compares the key only, for consistency of `Ord` and `Eq`.
impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for SleepEntry {}

/// Tasks waiting for a deadline, earliest first.
#[derive(Debug)]
pub struct SleepQueue {
    heap: BinaryHeap<SleepEntry, Min, MAX_NUM_TASKS>,
    seq: u64,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, time: u64, task: TaskHandle) -> Result<(), Error> {
        let entry = SleepEntry {
            time,
            seq: self.seq,
            task,
        };
        self.heap.push(entry).or(Err(Error::TimerFull))?;
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Earliest wake time, if any task sleeps.
    pub fn next_wake_time(&self) -> Option<u64> {
        self.heap.peek().map(|entry| entry.time)
    }

    /// Removes and returns one task whose wake time is not after `now`.
    pub fn pop_expired(&mut self, now: u64) -> Option<TaskHandle> {
        if self.next_wake_time()? <= now {
            self.heap.pop().map(|entry| entry.task)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, task: TaskHandle) -> bool {
        self.heap.iter().any(|entry| entry.task == task)
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
