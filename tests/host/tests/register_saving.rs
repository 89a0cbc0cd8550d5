//! Test of register saving in context switch
//! Inspired by the RegTests of FreeRTOS:
//!     https://freertos.org/Documentation/02-Kernel/06-Coding-guidelines/02-FreeRTOS-Coding-Standard-and-Style-Guide#testing
//!
//! One task keeps overwriting callee-saved registers while the other checks that its own values survive a switch.


use stackette::{TaskConfig, timer::sleep};

use crate::utils::init_scheduler;

const ROUNDS: usize = 100;

extern "C" fn yield_once() {
    sleep(0).unwrap();
}

/// Loads `base + n` into each tested register, switches away and back, and returns what the registers hold.
#[cfg(target_arch = "x86_64")]
fn fill_and_yield(base: u64) -> [u64; 4] {
    let (r12, r13, r14, r15): (u64, u64, u64, u64);
    unsafe {
        core::arch::asm!(
            "lea r12, [{base} + 12]",
            "lea r13, [{base} + 13]",
            "lea r14, [{base} + 14]",
            "lea r15, [{base} + 15]",
            "call {yield_once}",
            base = in(reg) base,
            yield_once = sym yield_once,
            out("r12") r12,
            out("r13") r13,
            out("r14") r14,
            out("r15") r15,
            clobber_abi("C"),
        );
    }
    [r12, r13, r14, r15].map(|reg| reg.wrapping_sub(base))
}

#[cfg(target_arch = "x86_64")]
const EXPECTED: [u64; 4] = [12, 13, 14, 15];

#[cfg(target_arch = "aarch64")]
fn fill_and_yield(base: u64) -> [u64; 9] {
    let mut regs = [0u64; 9];
    unsafe {
        core::arch::asm!(
            "add x20, {base}, #20",
            "add x21, {base}, #21",
            "add x22, {base}, #22",
            "add x23, {base}, #23",
            "add x24, {base}, #24",
            "add x25, {base}, #25",
            "add x26, {base}, #26",
            "add x27, {base}, #27",
            "add x28, {base}, #28",
            "bl {yield_once}",
            base = in(reg) base,
            yield_once = sym yield_once,
            out("x20") regs[0],
            out("x21") regs[1],
            out("x22") regs[2],
            out("x23") regs[3],
            out("x24") regs[4],
            out("x25") regs[5],
            out("x26") regs[6],
            out("x27") regs[7],
            out("x28") regs[8],
            clobber_abi("C"),
        );
    }
    regs.map(|reg| reg.wrapping_sub(base))
}

#[cfg(target_arch = "aarch64")]
const EXPECTED: [u64; 9] = [20, 21, 22, 23, 24, 25, 26, 27, 28];

fn main() {
    let scheduler = init_scheduler();

    scheduler
        .spawn(
            || loop {
                fill_and_yield(0x4200);
            },
            TaskConfig::default(),
        )
        .unwrap();

    scheduler
        .run_main(|| {
            for round in 0..ROUNDS {
                let base = (round as u64 + 1) << 16;
                assert_eq!(fill_and_yield(base), EXPECTED, "round {}", round);
            }
        })
        .unwrap();
}
