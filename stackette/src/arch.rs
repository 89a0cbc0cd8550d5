//! Interface for architecture-dependent functions implemented in separate crates.
//!
//! A backend crate defines every symbol below with `#[unsafe(no_mangle)]`.
//!
//! The switch primitive pushes the callee-saved registers of the running context onto its own stack,
//! stores the resulting stack pointer into `*save_sp`, loads `resume_sp`, pops the registers saved
//! there and returns into the resumed context.
//!
//! The frame built by `_stackette_init_stack` must look like one saved by `_stackette_swap`,
//! with the return address pointing to a trampoline that calls `entry(arg)`.
//! `entry` never returns.

unsafe extern "Rust" {
    /// INTERNAL USE ONLY
    pub unsafe fn _stackette_setup(clock_freq: u32, tick_freq: u32);
    /// INTERNAL USE ONLY
    pub unsafe fn _stackette_start_timer();
    /// INTERNAL USE ONLY
    pub unsafe fn _stackette_init_stack(top: *mut u8, entry: usize, arg: *mut u8) -> *mut u8;
    /// INTERNAL USE ONLY
    pub unsafe fn _stackette_wait_for_event();
}

unsafe extern "C" {
    /// INTERNAL USE ONLY
    pub unsafe fn _stackette_swap(save_sp: *mut usize, resume_sp: usize);
}

/// Entry function signature the trampoline jumps to.
pub type TaskEntry = extern "C" fn(arg: *mut u8) -> !;

/// Trait for caller-provided stack storage that lives for the rest of the program.
/// Modeled after `rp2040_hal`. https://docs.rs/rp2040-hal/0.11.0/rp2040_hal/multicore/struct.StackAllocation.html
pub trait StackAllocation {
    fn into_region(self) -> &'static mut [u8];
}

impl StackAllocation for &'static mut [u8] {
    fn into_region(self) -> &'static mut [u8] {
        self
    }
}
