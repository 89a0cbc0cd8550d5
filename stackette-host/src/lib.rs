//! Hosted (x86_64 / aarch64, System V) backend for [stackette](https://github.com/tana/stackette).
//!
//! Runs the scheduler inside an ordinary process so that it can be tested without hardware.
//! Time is virtual: whenever the scheduler loop idles, the clock advances by exactly one tick,
//! and an optional event hook stands in for interrupt handlers.

use core::cell::RefCell;

use critical_section::Mutex;
use stackette::{Scheduler, SchedulerConfig, timer};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("stackette-host only supports x86_64 and aarch64");

#[cfg(windows)]
compile_error!("stackette-host only supports the System V calling convention");

/// Nominal clock frequency reported to the scheduler.
const HOST_CLOCK_FREQ: u32 = 1_000_000;

static EVENT_HOOK: Mutex<RefCell<Option<fn()>>> = Mutex::new(RefCell::new(None));

/// Safely initializes the scheduler.
pub fn init_scheduler(config: SchedulerConfig) -> Option<Scheduler> {
    unsafe { Scheduler::init(HOST_CLOCK_FREQ, config) }
}

/// Installs a function called every time the scheduler loop idles, after the clock has advanced.
///
/// It plays the role of an interrupt handler: it may call `stackette::scheduler::reactivate`
/// or wake a `WaitList`, but must not block.
pub fn set_event_hook(hook: Option<fn()>) {
    critical_section::with(|cs| {
        EVENT_HOOK.replace(cs, hook);
    });
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_setup(_clock_freq: u32, tick_freq: u32) {
    log::debug!("Host backend set up, {} virtual ticks per second", tick_freq);
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_start_timer() {}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_wait_for_event() {
    timer::tick();

    let hook = critical_section::with(|cs| *EVENT_HOOK.borrow_ref(cs));
    if let Some(hook) = hook {
        hook();
    }
}

/// Registers saved by `_stackette_swap`, in the order they sit on the stack (lowest address first).
#[cfg(target_arch = "x86_64")]
#[repr(C)]
struct SwitchFrame {
    mxcsr: u32,
    fpu_cw: u16,
    _pad: u16,
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    ret: u64,
}

#[cfg(target_arch = "x86_64")]
impl SwitchFrame {
    fn initial(entry: usize, arg: *mut u8) -> Self {
        Self {
            mxcsr: 0x1F80,  // All exceptions masked, round to nearest
            fpu_cw: 0x037F, // Same for x87
            _pad: 0,
            r15: 0,
            r14: 0,
            r13: arg as u64,
            r12: entry as u64,
            rbx: 0,
            rbp: 0,
            ret: task_trampoline as *const () as usize as u64,
        }
    }
}

/// Context switching procedure
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _stackette_swap(_save_sp: *mut usize, _resume_sp: usize) {
    // RDI = where to save the current SP, RSI = SP to resume
    core::arch::naked_asm!(
        // Save callee-saved registers on the current stack
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        // Store the current SP and switch to the other stack
        "mov qword ptr [rdi], rsp",
        "mov rsp, rsi",
        // Restore registers saved on the other stack
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        // Return into the resumed context (or into the trampoline on the first resume)
        "ret",
    );
}

/// First code executed by a new task: calls the entry function (R12) with the argument (R13).
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn task_trampoline() -> ! {
    core::arch::naked_asm!("mov rdi, r13", "call r12", "ud2");
}

/// Registers saved by `_stackette_swap`, in the order they sit on the stack (lowest address first).
#[cfg(target_arch = "aarch64")]
#[repr(C)]
struct SwitchFrame {
    x19: u64,
    x20: u64,
    x21_x28: [u64; 8],
    x29: u64,
    x30: u64,
    d8_d15: [u64; 8],
}

#[cfg(target_arch = "aarch64")]
impl SwitchFrame {
    fn initial(entry: usize, arg: *mut u8) -> Self {
        Self {
            x19: entry as u64,
            x20: arg as u64,
            x21_x28: [0; 8],
            x29: 0,
            x30: task_trampoline as *const () as usize as u64,
            d8_d15: [0; 8],
        }
    }
}

/// Context switching procedure
#[cfg(target_arch = "aarch64")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _stackette_swap(_save_sp: *mut usize, _resume_sp: usize) {
    // X0 = where to save the current SP, X1 = SP to resume
    core::arch::naked_asm!(
        // Save callee-saved registers on the current stack
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8, d9, [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        // Store the current SP and switch to the other stack
        "mov x9, sp",
        "str x9, [x0]",
        "mov sp, x1",
        // Restore registers saved on the other stack
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8, d9, [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        // Return into the resumed context (or into the trampoline on the first resume)
        "ret",
    );
}

/// First code executed by a new task: calls the entry function (X19) with the argument (X20).
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn task_trampoline() -> ! {
    core::arch::naked_asm!("mov x0, x20", "blr x19", "brk #0");
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_init_stack(top: *mut u8, entry: usize, arg: *mut u8) -> *mut u8 {
    // `top` is 16-byte aligned, and so is the SP once the frame has been popped
    let frame = SwitchFrame::initial(entry, arg);
    unsafe {
        let sp = top.byte_sub(core::mem::size_of::<SwitchFrame>()) as *mut SwitchFrame;
        sp.write(frame);
        sp as *mut u8
    }
}

/// Minimal logger printing to the standard error, for tests and experiments.
pub struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

/// Installs [`StderrLogger`] with the given maximum level. Does nothing if a logger is already set.
pub fn init_logger(level: log::LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "[{:>5} t={}] {}: {}",
                record.level(),
                timer::current_time(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
