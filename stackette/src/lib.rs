//! Cooperative, stackful task scheduler for targets without OS threads.
//!
//! Every task owns a fixed-size stack and runs until it reaches one of the suspension points:
//! [`timer::sleep`], [`wait::WaitList::block_current`], [`scheduler::exit`] or [`scheduler::deadlock`].
//! There is no preemption, so code between two suspension points needs no locking against other tasks.
//!
//! The register save/restore primitive, the first-call trampoline and the tick source are provided by
//! a separate architecture crate (see [`arch`]).

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod arch;
mod context;
mod log_wrapper;
pub mod run_queue;
pub mod scheduler;
pub mod stack;
pub mod task;
pub mod timer;
pub mod wait;

pub use portable_atomic;

pub use scheduler::{Progress, Scheduler, SchedulerConfig, SchedulerStats};
pub use stack::Stack;
pub use task::{Status, TaskConfig, TaskHandle};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No free slot in the task table.
    TaskFull,
    /// The allocator could not provide a stack.
    OutOfMemory,
    /// The stack cannot hold the task closure and its initial frame.
    StackTooSmall,
    /// The handle refers to a task that no longer exists.
    NotFound,
    NotInitialized,
    /// Called from the scheduler context, but only tasks may do this.
    NotInTask,
    /// Called from a task, but only the scheduler context may do this.
    InTask,
    /// The task is not waiting on a channel.
    NotBlocked,
    /// The task is already in the run queue.
    AlreadyQueued,
    TimerFull,
    /// No task can ever become runnable again.
    Deadlock,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::TaskFull => "task table is full",
            Error::OutOfMemory => "stack allocation failed",
            Error::StackTooSmall => "stack too small for the task",
            Error::NotFound => "task not found",
            Error::NotInitialized => "scheduler not initialized",
            Error::NotInTask => "not called from a task",
            Error::InTask => "called from a task",
            Error::NotBlocked => "task is not blocked",
            Error::AlreadyQueued => "task is already in the run queue",
            Error::TimerFull => "sleep queue is full",
            Error::Deadlock => "all tasks are blocked (deadlock)",
        };
        f.write_str(msg)
    }
}
