//! The scheduler loop and the suspend/resume protocol.
//!
//! All scheduling state lives in one critical-section protected cell. A state transition is a single
//! critical section, and no context switch ever happens while that section (or a borrow of the cell) is held.
//!
//! The loop runs in its own context, the "idle" context, which is never enqueued. Tasks always switch back
//! to it, and it alone decides which task runs next.

use core::{cell::RefCell, marker::PhantomData};

use critical_section::Mutex;

use crate::{
    Error,
    arch::{self, StackAllocation},
    context::{self, Context},
    log_wrapper::{debug, error, info, trace, warn},
    run_queue::RunQueue,
    stack::{DEFAULT_STACK_SIZE, TaskStack},
    task::{Status, TaskConfig, TaskHandle, TaskTable, Tcb},
    timer::{self, SleepQueue},
};

static SCHEDULER_STATE: Mutex<RefCell<Option<SchedulerState>>> = Mutex::new(RefCell::new(None));

#[derive(Debug)]
struct SchedulerState {
    tasks: TaskTable,
    run_queue: RunQueue,
    sleep_queue: SleepQueue,
    /// Context of the scheduler loop itself.
    idle: Context,
    /// Task being executed. `None` while the loop itself runs.
    current: Option<TaskHandle>,
    config: SchedulerConfig,
    main_finished: bool,
    started: bool,
}

impl SchedulerState {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            tasks: TaskTable::new(),
            run_queue: RunQueue::new(),
            sleep_queue: SleepQueue::new(),
            idle: Context::empty(),
            current: None,
            config,
            main_finished: false,
            started: false,
        }
    }

    /// Moves every sleeper whose deadline has passed to the run queue, earliest deadline first.
    fn wake_expired(&mut self, now: u64) {
        while let Some(handle) = self.sleep_queue.pop_expired(now) {
            let Ok(tcb) = self.tasks.get_mut(handle) else {
                continue;
            };
            tcb.status = Status::Runnable;
            self.run_queue
                .push_back(handle)
                .unwrap_or_else(|_| unreachable!());
            trace!("Task {} woke up at {}", handle, now);
        }
    }

    fn waiting_tasks(&self) -> usize {
        self.tasks.count(|status| *status == Status::WaitingOnChannel)
    }
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SchedulerConfig {
    /// Frequency of [`timer::tick`] calls.
    pub tick_freq: u32,
    /// Stack size for tasks spawned without an explicit one.
    pub stack_size: usize,
    /// Whether something outside the tasks (e.g. an interrupt handler) may re-activate waiting tasks.
    /// Without it, tasks that all wait on channels are a deadlock.
    pub external_events: bool,
}

impl SchedulerConfig {
    pub fn with_tick_freq(self, tick_freq: u32) -> Self {
        Self { tick_freq, ..self }
    }

    pub fn with_stack_size(self, stack_size: usize) -> Self {
        Self { stack_size, ..self }
    }

    pub fn with_external_events(self, external_events: bool) -> Self {
        Self {
            external_events,
            ..self
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_freq: 1000,
            stack_size: DEFAULT_STACK_SIZE,
            external_events: false,
        }
    }
}

/// Outcome of one iteration of the scheduler loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// The task ran until its next suspension point.
    Ran(TaskHandle),
    /// Nothing is runnable yet; time has to pass or an external event has to arrive.
    Idle,
    /// The main task finished, or no task is left.
    Done,
}

/// Snapshot of queue occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerStats {
    /// Live tasks, in any state except finished.
    pub tasks: usize,
    pub run_queue: usize,
    pub sleep_queue: usize,
    pub waiting: usize,
}

enum Next {
    Dispatch(TaskHandle),
    Idle,
    Done,
}

/// Owner of the scheduler loop.
///
/// Only one exists at a time. It stays in the context that created it; dropping it releases every
/// remaining task, after which [`Scheduler::init`] may be called again.
pub struct Scheduler {
    clock_freq: u32,
    _not_send: PhantomData<*const ()>,
}

impl Scheduler {
    /// Initializes the global scheduler state. Returns `None` if it already exists.
    ///
    /// # Safety
    /// An architecture crate providing the [`arch`] symbols must be linked.
    /// Architecture crates wrap this in a safe `init_scheduler`.
    pub unsafe fn init(clock_freq: u32, config: SchedulerConfig) -> Option<Self> {
        if !critical_section::with(|cs| {
            let mut scheduler_state = SCHEDULER_STATE.borrow_ref_mut(cs);
            if scheduler_state.is_some() {
                // Scheduler is already initialized
                false
            } else {
                *scheduler_state = Some(SchedulerState::new(config));
                true
            }
        }) {
            return None;
        }

        timer::reset();
        info!("Scheduler initialized");

        Some(Scheduler {
            clock_freq,
            _not_send: PhantomData,
        })
    }

    #[cfg(feature = "alloc")]
    pub fn spawn<F: FnOnce() + Send + 'static>(
        &self,
        func: F,
        config: TaskConfig,
    ) -> Result<TaskHandle, Error> {
        spawn(func, config)
    }

    pub fn spawn_with_stack<F: FnOnce() + Send + 'static, S: StackAllocation>(
        &self,
        func: F,
        stack: S,
        config: TaskConfig,
    ) -> Result<TaskHandle, Error> {
        spawn_with_stack(func, stack, config)
    }

    /// Spawns `func` as the main task and runs until it finishes.
    ///
    /// Tasks still alive at that point are abandoned, never resumed again.
    #[cfg(feature = "alloc")]
    pub fn run_main<F: FnOnce() + Send + 'static>(&self, func: F) -> Result<(), Error> {
        spawn(func, TaskConfig::default().as_main())?;
        self.run()
    }

    /// Runs the scheduler loop until the main task finishes or no task is left.
    ///
    /// Returns [`Error::Deadlock`] when every remaining task waits on a channel and nothing can wake them.
    pub fn run(&self) -> Result<(), Error> {
        self.setup()?;

        loop {
            match self.step()? {
                Progress::Ran(_) => {}
                Progress::Idle => {
                    trace!("Idle");
                    unsafe {
                        arch::_stackette_wait_for_event();
                    }
                }
                Progress::Done => {
                    let abandoned = self.stats()?.tasks;
                    if abandoned > 0 {
                        warn!("Main task finished, abandoning {} task(s)", abandoned);
                    }
                    info!("Scheduler finished");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the scheduler loop and idles forever once it is done.
    ///
    /// A deadlock is fatal.
    pub fn start(&self) -> ! {
        if let Err(err) = self.run() {
            panic!("Scheduler stopped: {}", err);
        }

        loop {
            unsafe {
                arch::_stackette_wait_for_event();
            }
        }
    }

    /// Performs one iteration of the scheduler loop.
    ///
    /// Sleepers whose deadline has passed are moved to the run queue first, then the oldest runnable task
    /// runs until it reaches a suspension point.
    pub fn step(&self) -> Result<Progress, Error> {
        let now = timer::current_time();

        let next = critical_section::with(|cs| {
            let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
            let Some(state) = state.as_mut() else {
                return Err(Error::NotInitialized);
            };

            if state.current.is_some() {
                return Err(Error::InTask);
            }

            if state.main_finished {
                return Ok(Next::Done);
            }

            state.wake_expired(now);

            if let Some(handle) = state.run_queue.pop_front() {
                return Ok(Next::Dispatch(handle));
            }

            if !state.sleep_queue.is_empty() {
                return Ok(Next::Idle);
            }

            let waiting = state.waiting_tasks();
            if waiting == 0 {
                Ok(Next::Done)
            } else if state.config.external_events {
                Ok(Next::Idle)
            } else {
                error!(
                    "Deadlock: {} task(s) wait on channels and nothing can wake them",
                    waiting
                );
                Err(Error::Deadlock)
            }
        })?;

        match next {
            Next::Dispatch(handle) => {
                self.resume(handle)?;
                Ok(Progress::Ran(handle))
            }
            Next::Idle => Ok(Progress::Idle),
            Next::Done => Ok(Progress::Done),
        }
    }

    /// Switches into `handle` and returns once it switches back.
    fn resume(&self, handle: TaskHandle) -> Result<(), Error> {
        let (save, resume_sp) = critical_section::with(|cs| {
            let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
            let Some(state) = state.as_mut() else {
                return Err(Error::NotInitialized);
            };

            let resume_sp = state.tasks.get(handle)?.context.sp;
            state.current = Some(handle);

            Ok((&mut state.idle.sp as *mut usize, resume_sp))
        })?;

        trace!("Resuming task {}", handle);

        // SAFETY: the idle context lives in the static state; `resume_sp` was saved by the task's last switch
        // or built by `context::prepare`.
        unsafe { context::switch(save, None, resume_sp) };

        let finished = critical_section::with(|cs| {
            let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
            let Some(state) = state.as_mut() else {
                unreachable!()
            };
            state.current = None;

            let tcb = state.tasks.get(handle)?;
            match tcb.status {
                Status::Finished => {
                    let tcb = state.tasks.remove(handle)?;
                    if tcb.main {
                        state.main_finished = true;
                    }
                    Ok(Some(tcb))
                }
                Status::Runnable => {
                    // Switched back without blocking, or re-activated before it switched back
                    if !state.run_queue.contains(handle) {
                        state.run_queue.push_back(handle)?;
                    }
                    Ok(None)
                }
                Status::Sleeping { .. } | Status::WaitingOnChannel => Ok(None),
            }
        })?;

        if let Some(tcb) = finished {
            debug!("Task {} removed", handle);
            // SAFETY: the task finished and will never be resumed; nothing points into its stack anymore.
            unsafe { tcb.stack.release() };
        }

        Ok(())
    }

    pub fn stats(&self) -> Result<SchedulerStats, Error> {
        stats()
    }

    fn setup(&self) -> Result<(), Error> {
        let (first, tick_freq) = critical_section::with(|cs| {
            let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
            let Some(state) = state.as_mut() else {
                return Err(Error::NotInitialized);
            };
            let first = !state.started;
            state.started = true;
            Ok((first, state.config.tick_freq))
        })?;

        if first {
            unsafe {
                arch::_stackette_setup(self.clock_freq, tick_freq);
                arch::_stackette_start_timer();
            }
            info!("Scheduler started");
        }

        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let state = critical_section::with(|cs| SCHEDULER_STATE.borrow_ref_mut(cs).take());
        let Some(mut state) = state else {
            return;
        };

        let mut released = 0;
        for tcb in state.tasks.drain() {
            // SAFETY: the loop is not running, so no task executes on any of these stacks.
            unsafe { tcb.stack.release() };
            released += 1;
        }
        if released > 0 {
            warn!("Released {} unfinished task(s)", released);
        }
    }
}

/// Spawns a task on a stack taken from the global allocator.
///
/// Callable before the loop starts and from running tasks. The new task runs after every task already
/// in the run queue.
#[cfg(feature = "alloc")]
pub fn spawn<F: FnOnce() + Send + 'static>(
    func: F,
    config: TaskConfig,
) -> Result<TaskHandle, Error> {
    let stack_size = match config.stack_size {
        Some(size) => size,
        None => get_config()?.stack_size,
    };

    spawn_on(TaskStack::allocate(stack_size)?, func, config)
}

/// Spawns a task on caller-provided stack storage.
pub fn spawn_with_stack<F: FnOnce() + Send + 'static, S: StackAllocation>(
    func: F,
    stack: S,
    config: TaskConfig,
) -> Result<TaskHandle, Error> {
    spawn_on(TaskStack::from_static(stack)?, func, config)
}

fn spawn_on<F: FnOnce() + Send + 'static>(
    stack: TaskStack,
    func: F,
    config: TaskConfig,
) -> Result<TaskHandle, Error> {
    let prepared = match context::prepare(&stack, func) {
        Ok(prepared) => prepared,
        Err(err) => {
            // SAFETY: nothing has run on the stack.
            unsafe { stack.release() };
            return Err(err);
        }
    };

    let main = config.main;
    let tcb = Tcb {
        context: Context { sp: prepared.sp },
        resume_address: prepared.entry,
        status: Status::Runnable,
        stack,
        main,
    };
    debug!(
        "New stack from={} size={} entry={}",
        tcb.stack.bottom(),
        tcb.stack.len(),
        tcb.resume_address
    );

    let result = critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err((Error::NotInitialized, tcb));
        };

        let handle = match state.tasks.insert(tcb) {
            Ok(handle) => handle,
            Err(tcb) => return Err((Error::TaskFull, tcb)),
        };
        state
            .run_queue
            .push_back(handle)
            .unwrap_or_else(|_| unreachable!());
        if main {
            // A new main task starts a new run of the loop
            state.main_finished = false;
        }

        Ok(handle)
    });

    match result {
        Ok(handle) => {
            info!("Task {} created", handle);
            Ok(handle)
        }
        Err((err, tcb)) => {
            // SAFETY: the task never ran, so the closure is still in place and nothing uses the stack.
            unsafe {
                context::discard::<F>(prepared.arg);
                tcb.stack.release();
            }
            Err(err)
        }
    }
}

/// Blocks the current task until `time`. The sleep queue holds it until then.
pub(crate) fn suspend_until(time: u64) -> Result<(), Error> {
    let handle = critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let handle = state.current.ok_or(Error::NotInTask)?;

        state.sleep_queue.push(time, handle)?;
        state.tasks.get_mut(handle)?.status = Status::Sleeping { until: time };

        Ok(handle)
    })?;

    trace!("Task {} sleeps until {}", handle, time);

    yield_to_scheduler()
}

/// Marks the current task as waiting on a channel and returns its handle.
///
/// The caller records the handle in its wait list and then calls [`yield_to_scheduler`].
pub(crate) fn mark_current_waiting() -> Result<TaskHandle, Error> {
    critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let handle = state.current.ok_or(Error::NotInTask)?;
        state.tasks.get_mut(handle)?.status = Status::WaitingOnChannel;

        Ok(handle)
    })
}

/// Switches from the current task into the scheduler context.
///
/// Returns when the scheduler resumes the task again. The task's status must already say why it yields.
pub(crate) fn yield_to_scheduler() -> Result<(), Error> {
    let (save, guard, resume_sp) = critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let handle = state.current.ok_or(Error::NotInTask)?;
        let idle_sp = state.idle.sp;
        let tcb = state.tasks.get_mut(handle)?;

        Ok((&mut tcb.context.sp as *mut usize, tcb.stack.guard(), idle_sp))
    })?;

    // SAFETY: the TCB slot stays allocated until the scheduler observes the task finished, which happens
    // only after this switch has completed.
    unsafe { context::switch(save, Some(guard), resume_sp) };

    Ok(())
}

/// Moves a task waiting on a channel back to the run queue.
///
/// Does not switch, so interrupt handlers may call it.
pub fn reactivate(handle: TaskHandle) -> Result<(), Error> {
    critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };

        let tcb = state.tasks.get_mut(handle)?;
        if tcb.status != Status::WaitingOnChannel {
            return Err(Error::NotBlocked);
        }
        tcb.status = Status::Runnable;
        state.run_queue.push_back(handle)
    })?;

    trace!("Task {} is re-activated", handle);

    Ok(())
}

/// Terminates the current task. It is never resumed and its stack is released by the scheduler.
///
/// Unlike returning from the task function, values still alive on the task's stack are not dropped:
/// no destructor runs on this path.
pub fn exit() -> ! {
    let handle = critical_section::with(|cs| {
        let mut state = SCHEDULER_STATE.borrow_ref_mut(cs);
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };
        let handle = state.current.ok_or(Error::NotInTask)?;
        state.tasks.get_mut(handle)?.status = Status::Finished;

        Ok(handle)
    });

    match handle {
        Ok(handle) => info!("Task {} finished", handle),
        Err(err) => panic!("exit() outside of a task: {}", err),
    }

    if let Err(err) = yield_to_scheduler() {
        panic!("exit() could not switch to the scheduler: {}", err);
    }

    unreachable!("a finished task was resumed")
}

/// Abandons the current task, which waits for something that can never happen.
///
/// Behaves exactly like [`exit`].
pub fn deadlock() -> ! {
    if let Ok(handle) = current() {
        warn!("Task {} can never make progress, abandoning it", handle);
    }
    exit()
}

/// Handle of the task calling this.
pub fn current() -> Result<TaskHandle, Error> {
    critical_section::with(|cs| {
        let state = SCHEDULER_STATE.borrow_ref(cs);
        let Some(state) = state.as_ref() else {
            return Err(Error::NotInitialized);
        };

        state.current.ok_or(Error::NotInTask)
    })
}

pub(crate) fn status(handle: TaskHandle) -> Result<Status, Error> {
    critical_section::with(|cs| {
        let state = SCHEDULER_STATE.borrow_ref(cs);
        let Some(state) = state.as_ref() else {
            return Err(Error::NotInitialized);
        };

        Ok(state.tasks.get(handle)?.status)
    })
}

pub fn get_config() -> Result<SchedulerConfig, Error> {
    critical_section::with(|cs| {
        let state = SCHEDULER_STATE.borrow_ref(cs);
        let Some(state) = state.as_ref() else {
            return Err(Error::NotInitialized);
        };

        Ok(state.config.clone())
    })
}

pub fn stats() -> Result<SchedulerStats, Error> {
    critical_section::with(|cs| {
        let state = SCHEDULER_STATE.borrow_ref(cs);
        let Some(state) = state.as_ref() else {
            return Err(Error::NotInitialized);
        };

        Ok(SchedulerStats {
            tasks: state.tasks.len(),
            run_queue: state.run_queue.len(),
            sleep_queue: state.sleep_queue.len(),
            waiting: state.waiting_tasks(),
        })
    })
}
