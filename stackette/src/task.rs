//! Task control blocks and the table that owns them.

use core::{cell::Cell, fmt};

use critical_section::Mutex;

use crate::{Error, context::Context, stack::TaskStack};

pub(crate) const MAX_NUM_TASKS: usize = 32;

/// Source of handle generations. Shared by every task table, so handles stay unique across re-initialization.
static NEXT_GENERATION: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

fn next_generation() -> u32 {
    critical_section::with(|cs| {
        let generation = NEXT_GENERATION.borrow(cs);
        let value = generation.get();
        generation.set(value.wrapping_add(1));
        value
    })
}

/// Handle object for a task.
///
/// This is just a surrogate for a slot in the task table plus the generation of that slot.
/// Dropping this has no effect on the actual task, and a handle outliving its task
/// is rejected with [`Error::NotFound`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl TaskHandle {
    pub fn id(&self) -> usize {
        self.index
    }

    /// Re-activates the task if it is waiting on a channel.
    pub fn reactivate(&self) -> Result<(), Error> {
        crate::scheduler::reactivate(*self)
    }

    pub fn status(&self) -> Result<Status, Error> {
        crate::scheduler::status(*self)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Scheduling state of a task. Each state corresponds to exactly one place the task can be found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// In the run queue, or currently executing.
    Runnable,
    /// In the sleep queue until the given tick.
    Sleeping { until: u64 },
    /// Held by the wait list of a channel.
    WaitingOnChannel,
    /// Terminated; never resumed again.
    Finished,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Runnable => f.write_str("runnable"),
            Status::Sleeping { until } => write!(f, "sleeping until {}", until),
            Status::WaitingOnChannel => f.write_str("waiting on channel"),
            Status::Finished => f.write_str("finished"),
        }
    }
}

#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct TaskConfig {
    pub(crate) stack_size: Option<usize>,
    pub(crate) main: bool,
}

impl TaskConfig {
    /// Sets the size of the stack allocated for the task.
    ///
    /// Falls back to the scheduler-wide setting when unset.
    pub fn with_stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            ..self
        }
    }

    /// Marks the task as the main task of the program.
    ///
    /// The scheduler loop ends as soon as the main task finishes, whatever the other tasks are doing.
    pub fn as_main(self) -> Self {
        Self { main: true, ..self }
    }
}

/// Task Control Block (TCB)
#[derive(Debug)]
pub(crate) struct Tcb {
    pub(crate) context: Context,
    /// Function the first-call trampoline jumps to.
    pub(crate) resume_address: usize,
    pub(crate) status: Status,
    pub(crate) stack: TaskStack,
    pub(crate) main: bool,
}

/// Arena of TCBs. Slots are reused; the generation tells the occupants apart.
#[derive(Debug)]
pub(crate) struct TaskTable {
    slots: [Option<Tcb>; MAX_NUM_TASKS],
    generations: [u32; MAX_NUM_TASKS],
}

impl TaskTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_NUM_TASKS],
            generations: [0; MAX_NUM_TASKS],
        }
    }

    /// Places the TCB in a free slot. On failure the TCB is handed back so its stack can be released.
    pub(crate) fn insert(&mut self, tcb: Tcb) -> Result<TaskHandle, Tcb> {
        let Some(index) = self.slots.iter().position(|slot| slot.is_none()) else {
            return Err(tcb);
        };

        let generation = next_generation();
        self.slots[index] = Some(tcb);
        self.generations[index] = generation;
        Ok(TaskHandle { index, generation })
    }

    pub(crate) fn get(&self, handle: TaskHandle) -> Result<&Tcb, Error> {
        if self.generations.get(handle.index) != Some(&handle.generation) {
            return Err(Error::NotFound);
        }
        self.slots[handle.index].as_ref().ok_or(Error::NotFound)
    }

    pub(crate) fn get_mut(&mut self, handle: TaskHandle) -> Result<&mut Tcb, Error> {
        if self.generations.get(handle.index) != Some(&handle.generation) {
            return Err(Error::NotFound);
        }
        self.slots[handle.index].as_mut().ok_or(Error::NotFound)
    }

    /// Empties the slot. Handles to it stay stale, since the next occupant gets a fresh generation.
    pub(crate) fn remove(&mut self, handle: TaskHandle) -> Result<Tcb, Error> {
        self.get(handle)?;
        self.slots[handle.index].take().ok_or(Error::NotFound)
    }

    pub(crate) fn count(&self, pred: impl Fn(&Status) -> bool) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|tcb| pred(&tcb.status))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Removes every task, returning their TCBs.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Tcb> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}
