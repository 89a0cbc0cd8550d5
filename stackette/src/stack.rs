//! Task stacks and the canary that guards them against overflow.
//!
//! The canary is a single word written once at the lowest address of the region, which is the end
//! the stack pointer approaches as the stack grows. It is compared against [`STACK_CANARY`] every
//! time the owning task switches away.

use core::ptr::NonNull;

use crate::{Error, arch::StackAllocation};

/// Random value from random.org, truncated to the word size.
pub const STACK_CANARY: usize = 0x670c_1333_b83b_f575_u64 as usize;

/// Stack size used when neither the scheduler nor the task configuration sets one.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Alignment of the stack top, enough for every supported ABI.
pub(crate) const STACK_ALIGN: usize = 16;

const WORD: usize = core::mem::size_of::<usize>();

#[derive(Debug)]
enum Storage {
    #[cfg(feature = "alloc")]
    Heap(core::alloc::Layout),
    Static,
}

/// Stack region exclusively owned by one task.
#[derive(Debug)]
pub(crate) struct TaskStack {
    base: NonNull<u8>,
    len: usize,
    storage: Storage,
}

// SAFETY: the region is owned by exactly one task and only touched on the single core that runs the scheduler.
unsafe impl Send for TaskStack {}

impl TaskStack {
    /// Allocates a stack from the global allocator.
    #[cfg(feature = "alloc")]
    pub(crate) fn allocate(size: usize) -> Result<Self, Error> {
        let layout =
            core::alloc::Layout::from_size_align(size, STACK_ALIGN).or(Err(Error::OutOfMemory))?;
        if layout.size() == 0 {
            return Err(Error::StackTooSmall);
        }

        // SAFETY: the layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc::alloc::alloc(layout) }).ok_or(Error::OutOfMemory)?;

        let stack = Self {
            base,
            len: size,
            storage: Storage::Heap(layout),
        };
        stack.plant_canary()?;
        Ok(stack)
    }

    /// Takes over a caller-provided region.
    pub(crate) fn from_static<S: StackAllocation>(stack: S) -> Result<Self, Error> {
        let region = stack.into_region();
        let len = region.len();
        let base = NonNull::new(region.as_mut_ptr()).ok_or(Error::StackTooSmall)?;

        let stack = Self {
            base,
            len,
            storage: Storage::Static,
        };
        stack.plant_canary()?;
        Ok(stack)
    }

    fn canary_ptr(&self) -> *mut usize {
        let addr = self.base.as_ptr() as usize;
        addr.next_multiple_of(WORD) as *mut usize
    }

    fn plant_canary(&self) -> Result<(), Error> {
        if self.usable_bottom() >= self.top() as usize {
            return Err(Error::StackTooSmall);
        }

        // SAFETY: the canary word lies inside the region (checked above) and is aligned.
        unsafe { self.canary_ptr().write_volatile(STACK_CANARY) };
        Ok(())
    }

    /// Lowest address a task may use (just above the canary).
    pub(crate) fn usable_bottom(&self) -> usize {
        self.canary_ptr() as usize + WORD
    }

    /// Highest address of the region, aligned down to [`STACK_ALIGN`].
    pub(crate) fn top(&self) -> *mut u8 {
        let end = self.base.as_ptr() as usize + self.len;
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }

    pub(crate) fn guard(&self) -> StackGuard {
        StackGuard {
            canary: self.canary_ptr(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bottom(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Returns the memory to the allocator, or forgets a static region.
    ///
    /// # Safety
    /// No context may be executing on, or hold pointers into, this stack anymore.
    pub(crate) unsafe fn release(self) {
        match self.storage {
            #[cfg(feature = "alloc")]
            // SAFETY: allocated in `allocate` with this layout; the caller guarantees nobody uses it.
            Storage::Heap(layout) => unsafe { alloc::alloc::dealloc(self.base.as_ptr(), layout) },
            Storage::Static => {}
        }
    }
}

/// Copyable reference to a task's canary word, checked right before switching away from the task.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StackGuard {
    canary: *const usize,
}

impl StackGuard {
    pub(crate) fn is_intact(&self) -> bool {
        // SAFETY: the guard is only created from a live `TaskStack`, which outlives every switch away from its task.
        unsafe { self.canary.read_volatile() == STACK_CANARY }
    }

    /// Halts with a fatal error if the canary has been overwritten.
    pub(crate) fn check(&self) {
        if !self.is_intact() {
            panic!("Stack overflow detected (canary at {:p})", self.canary);
        }
    }
}

/// Correctly aligned stack storage for [`crate::scheduler::spawn_with_stack`].
///
/// Modeled after [rp2040-hal implementation](https://docs.rs/rp2040-hal/0.11.0/rp2040_hal/multicore/struct.Stack.html).
#[repr(C, align(16))]
pub struct Stack<const N: usize>([u8; N]);

impl<const N: usize> Stack<N> {
    pub const fn new() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StackAllocation for &'static mut Stack<N> {
    fn into_region(self) -> &'static mut [u8] {
        &mut self.0
    }
}
