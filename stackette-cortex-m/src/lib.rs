//! Cortex-M specific code for [stackette](https://github.com/tana/stackette)
//!
//! This is the Cortex-M specific part of the [stackette](https://github.com/tana/stackette) scheduler.
//! It supports Armv6-M (Cortex-M0/M0+), and Armv7-M / Armv8-M Mainline with or without an FPU.
//!
//! Tasks run in Thread mode on the main stack pointer; a switch simply points SP at another stack.
//! Exceptions taken while a task runs are therefore stacked on the task's own stack.

#![no_std]

use cortex_m::peripheral::{SYST, syst::SystClkSource};
use stackette::{Scheduler, SchedulerConfig, timer};

/// Registers saved by `_stackette_swap`, in the order they sit on the stack (lowest address first).
#[cfg(target_has_atomic = "32")]
#[repr(C, align(8))]
#[derive(Clone, Debug)]
struct SwitchFrame {
    _pad: u32, // For stack alignment
    #[cfg(target_abi = "eabihf")]
    s16_s31: [u32; 16],
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    lr: u32,
}

#[cfg(target_has_atomic = "32")]
impl SwitchFrame {
    fn initial(entry: u32, arg: u32) -> Self {
        Self {
            _pad: 0,
            #[cfg(target_abi = "eabihf")]
            s16_s31: [0; 16],
            r4: entry,
            r5: arg,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            lr: task_trampoline as *const () as usize as u32, // Thumb bit already set
        }
    }
}

/// Registers saved by `_stackette_swap` on Armv6-M, where only R4-R7 can be pushed directly.
#[cfg(not(target_has_atomic = "32"))]
#[repr(C, align(8))]
#[derive(Clone, Debug)]
struct SwitchFrame {
    _pad: u32, // For stack alignment
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    lr: u32,
}

#[cfg(not(target_has_atomic = "32"))]
impl SwitchFrame {
    fn initial(entry: u32, arg: u32) -> Self {
        Self {
            _pad: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r4: entry,
            r5: arg,
            r6: 0,
            r7: 0,
            lr: task_trampoline as *const () as usize as u32, // Thumb bit already set
        }
    }
}

/// Safely initializes the scheduler.
pub fn init_scheduler(_syst: SYST, clock_freq: u32, config: SchedulerConfig) -> Option<Scheduler> {
    unsafe { Scheduler::init(clock_freq, config) }
}

/// Context switching procedure
#[cfg(not(target_has_atomic = "32"))] // No atomic => thumbv6m
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _stackette_swap(_save_sp: *mut usize, _resume_sp: usize) {
    // R0 = where to save the current SP, R1 = SP to resume
    core::arch::naked_asm!(
        "push {{r4-r7, lr}}", // Save the lower half of the callee-saved registers and the return address
        // Copy the higher half of the callee-saved registers into the lower half
        "mov r4, r8",
        "mov r5, r9",
        "mov r6, r10",
        "mov r7, r11",
        "push {{r4-r7}}", // Save the copied register values
        "sub sp, #4",     // For stack alignment

        "mov r2, sp",
        "str r2, [r0]", // Store the current SP
        "mov sp, r1",   // Switch to the other stack

        "add sp, #4",    // For stack alignment
        "pop {{r4-r7}}", // Load the values of R8-R11 into R4-R7
        // Restore R8-R11 from the loaded values
        "mov r8, r4",
        "mov r9, r5",
        "mov r10, r6",
        "mov r11, r7",
        "pop {{r4-r7, pc}}", // Restore R4-R7 and return into the resumed context
    );
}

/// Context switching procedure
#[cfg(all(target_has_atomic = "32", target_abi = "eabi"))] // Has atomic => thumbv7m or above, No FPU
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _stackette_swap(_save_sp: *mut usize, _resume_sp: usize) {
    // R0 = where to save the current SP, R1 = SP to resume
    core::arch::naked_asm!(
        "push {{r4-r11, lr}}", // Save the callee-saved registers and the return address
        "sub sp, #4",          // For stack alignment

        "mov r2, sp",
        "str r2, [r0]", // Store the current SP
        "mov sp, r1",   // Switch to the other stack

        "add sp, #4",         // For stack alignment
        "pop {{r4-r11, pc}}", // Restore the registers and return into the resumed context
    );
}

/// Context switching procedure
/// For chips with an FPU. S16-S31 are callee-saved in the hard-float ABI.
#[cfg(target_abi = "eabihf")] // FPU
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _stackette_swap(_save_sp: *mut usize, _resume_sp: usize) {
    // R0 = where to save the current SP, R1 = SP to resume
    core::arch::naked_asm!(
        "push {{r4-r11, lr}}", // Save the callee-saved core registers and the return address
        "vpush {{s16-s31}}",   // Save the callee-saved FP registers
        "sub sp, #4",          // For stack alignment

        "mov r2, sp",
        "str r2, [r0]", // Store the current SP
        "mov sp, r1",   // Switch to the other stack

        "add sp, #4",         // For stack alignment
        "vpop {{s16-s31}}",
        "pop {{r4-r11, pc}}", // Restore the registers and return into the resumed context
    );
}

/// First code executed by a new task: calls the entry function (R4) with the argument (R5).
#[unsafe(naked)]
unsafe extern "C" fn task_trampoline() -> ! {
    core::arch::naked_asm!("mov r0, r5", "blx r4", "udf #0");
}

#[cortex_m_rt::exception]
fn SysTick() {
    timer::tick();
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_setup(clock_freq: u32, tick_freq: u32) {
    let peripherals = unsafe { cortex_m::Peripherals::steal() };
    let mut syst = peripherals.SYST;

    // Configure the SysTick timer
    let reload = clock_freq / tick_freq;
    assert!(reload > 0 && reload - 1 <= 0xFFFFFF); // SysTick has 24-bit limit
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload - 1);
    syst.clear_current();
    syst.enable_interrupt();
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_start_timer() {
    let peripherals = unsafe { cortex_m::Peripherals::steal() };
    let mut syst = peripherals.SYST;

    // Start the SysTick timer
    syst.enable_counter();
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_init_stack(top: *mut u8, entry: usize, arg: *mut u8) -> *mut u8 {
    // `top` is 16-byte aligned and the frame size is a multiple of 8, so SP stays 8-byte aligned
    let frame = SwitchFrame::initial(entry as u32, arg as u32);
    unsafe {
        let sp = top.byte_sub(core::mem::size_of::<SwitchFrame>()) as *mut SwitchFrame;
        sp.write(frame);
        sp as *mut u8
    }
}

/// INTERNAL USE ONLY
#[unsafe(no_mangle)]
pub fn _stackette_wait_for_event() {
    // SysTick fires periodically, so a wake-up that raced with this is noticed within one tick
    cortex_m::asm::wfi();
}
