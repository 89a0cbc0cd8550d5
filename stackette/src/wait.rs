//! Wait lists: the handshake between the scheduler and blocking primitives such as channels.
//!
//! A blocking operation puts the current task on a wait list with [`WaitList::block_current`].
//! The complementary operation, usually performed by another task, takes it off again with
//! [`WaitList::wake_one`], which puts it back in the run queue.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use heapless::Deque;

use crate::{
    Error,
    log_wrapper::trace,
    scheduler,
    task::{MAX_NUM_TASKS, Status, TaskHandle},
};

/// FIFO of tasks waiting for the same event.
pub struct WaitList {
    waiting_tasks: Mutex<RefCell<Deque<TaskHandle, MAX_NUM_TASKS>>>,
}

impl WaitList {
    pub const fn new() -> Self {
        Self {
            waiting_tasks: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Suspends the current task until another task wakes it through this list.
    ///
    /// If nothing ever does, the scheduler loop reports a deadlock once no other task can run.
    pub fn block_current(&self) -> Result<(), Error> {
        self.block_current_if(|_| true).map(|_| ())
    }

    /// Suspends the current task like [`Self::block_current`], but only if `cond` holds.
    ///
    /// `cond` is evaluated in the same critical section that registers the task, so a wake-up issued by an
    /// interrupt handler cannot slip in between the check and the registration. Returns whether the task blocked.
    pub fn block_current_if(
        &self,
        cond: impl FnOnce(CriticalSection<'_>) -> bool,
    ) -> Result<bool, Error> {
        let blocked = critical_section::with(|cs| {
            if !cond(cs) {
                return Ok(false);
            }

            let mut waiting_tasks = self.waiting_tasks.borrow_ref_mut(cs);
            if waiting_tasks.is_full() {
                prune(&mut waiting_tasks);
                if waiting_tasks.is_full() {
                    return Err(Error::TaskFull);
                }
            }

            let task = scheduler::mark_current_waiting()?;
            // Already listed if it was re-activated directly and came back before being woken through the list
            if !waiting_tasks.iter().any(|waiting| *waiting == task) {
                waiting_tasks
                    .push_back(task)
                    .unwrap_or_else(|_| unreachable!());
            }

            trace!("Task {} waits", task);

            Ok::<_, Error>(true)
        })?;

        if blocked {
            scheduler::yield_to_scheduler()?;
        }

        Ok(blocked)
    }

    /// Re-activates the task that has waited longest. Returns whether there was one.
    ///
    /// Entries whose task no longer waits are discarded on the way.
    pub fn wake_one(&self) -> bool {
        critical_section::with(|cs| {
            let mut waiting_tasks = self.waiting_tasks.borrow_ref_mut(cs);
            while let Some(task) = waiting_tasks.pop_front() {
                match scheduler::reactivate(task) {
                    Ok(()) => return true,
                    Err(err) => trace!("Skipping task {} in wait list: {}", task, err),
                }
            }

            false
        })
    }

    /// Re-activates every waiting task, oldest first. Returns how many there were.
    pub fn wake_all(&self) -> usize {
        let mut woken = 0;
        while self.wake_one() {
            woken += 1;
        }
        woken
    }

    /// Number of entries, including ones whose task no longer waits.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.waiting_tasks.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops entries whose task no longer waits on a channel.
fn prune(waiting_tasks: &mut Deque<TaskHandle, MAX_NUM_TASKS>) {
    for _ in 0..waiting_tasks.len() {
        let Some(task) = waiting_tasks.pop_front() else {
            break;
        };
        if scheduler::status(task) == Ok(Status::WaitingOnChannel) {
            waiting_tasks
                .push_back(task)
                .unwrap_or_else(|_| unreachable!());
        }
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}
