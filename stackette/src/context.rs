//! The context switch and the preparation of fresh task stacks.
//!
//! This is the only module touching raw stack memory. Everything else works on task handles.

use core::mem::{align_of, size_of};

use crate::{
    Error,
    arch::{self, TaskEntry},
    scheduler,
    stack::{STACK_ALIGN, StackGuard, TaskStack},
};

/// Space reserved below the closure for the initial register frame built by the backend.
const INITIAL_FRAME_RESERVE: usize = 256;

/// Saved execution context.
///
/// The callee-saved registers live on the context's own stack; only the stack pointer is kept here.
#[derive(Clone, Debug)]
pub(crate) struct Context {
    pub(crate) sp: usize,
}

impl Context {
    pub(crate) const fn empty() -> Self {
        Self { sp: 0 }
    }
}

/// Saves the running context into `save_into` and resumes the context saved at `resume_sp`.
///
/// Returns when another switch names `save_into` as its resume target.
/// `guard` belongs to the context being left; it is checked before anything is saved.
///
/// # Safety
/// `save_into` must stay valid until the switch back, `resume_sp` must come from a previous switch or from
/// [`prepare`], and no critical section or `RefCell` borrow may be held by the caller.
pub(crate) unsafe fn switch(save_into: *mut usize, guard: Option<StackGuard>, resume_sp: usize) {
    if let Some(guard) = guard {
        guard.check();
    }

    unsafe { arch::_stackette_swap(save_into, resume_sp) }
}

/// A fresh stack ready for its first resume.
pub(crate) struct Prepared {
    /// Initial stack pointer.
    pub(crate) sp: usize,
    /// Address of the entry function the trampoline calls.
    pub(crate) entry: usize,
    /// Where the closure was moved to.
    pub(crate) arg: *mut u8,
}

/// Moves `f` onto the top of `stack` and builds the initial frame.
pub(crate) fn prepare<F: FnOnce() + Send + 'static>(
    stack: &TaskStack,
    f: F,
) -> Result<Prepared, Error> {
    if align_of::<Option<F>>() > STACK_ALIGN {
        return Err(Error::StackTooSmall);
    }

    let top = stack.top() as usize;
    let slot_size = size_of::<Option<F>>().next_multiple_of(STACK_ALIGN);
    let slot = top
        .checked_sub(slot_size)
        .filter(|slot| {
            slot.checked_sub(INITIAL_FRAME_RESERVE)
                .is_some_and(|frame_bottom| frame_bottom >= stack.usable_bottom())
        })
        .ok_or(Error::StackTooSmall)?;

    let entry = task_entry::<F> as TaskEntry as *const () as usize;

    let arg = slot as *mut Option<F>;
    let sp = unsafe {
        // SAFETY: `slot` is aligned and lies inside the stack, above the space reserved for the frame.
        arg.write(Some(f));
        arch::_stackette_init_stack(slot as *mut u8, entry, arg as *mut u8)
    };

    Ok(Prepared {
        sp: sp as usize,
        entry,
        arg: arg as *mut u8,
    })
}

/// Drops the closure of a task that was prepared but never resumed.
///
/// # Safety
/// `arg` must come from [`prepare`] with the same `F`, and the task must never run.
pub(crate) unsafe fn discard<F: FnOnce()>(arg: *mut u8) {
    unsafe { core::ptr::drop_in_place(arg as *mut Option<F>) }
}

/// First Rust function executed on a new stack. Runs the closure, then exits the task.
extern "C" fn task_entry<F: FnOnce()>(arg: *mut u8) -> ! {
    // SAFETY: `prepare` put an `Option<F>` at this address, and this is the only place it is read.
    let f = unsafe { (*(arg as *mut Option<F>)).take() };
    if let Some(f) = f {
        f()
    } else {
        unreachable!()
    }

    scheduler::exit()
}
