//! Test of stack overflow detection by canary


use static_cell::ConstStaticCell;
use stackette::{Stack, TaskConfig, timer::sleep};

use crate::utils::init_scheduler;

/// Task stack with room below it, so that overflowing frames land in memory owned by this test.
#[repr(C)]
struct Padded {
    overflow_area: [u8; 64 * 1024],
    stack: Stack<{ 32 * 1024 }>,
}

static TASK1_STACK: ConstStaticCell<Padded> = ConstStaticCell::new(Padded {
    overflow_area: [0; 64 * 1024],
    stack: Stack::new(),
});

fn main() {
    let scheduler = init_scheduler();

    std::panic::set_hook(Box::new(|info| {
        if info
            .payload_as_str()
            .is_some_and(|message| message.starts_with("Stack overflow detected"))
        {
            std::process::exit(0);
        }

        eprintln!("{}", info);
        std::process::exit(1);
    }));

    let padded = TASK1_STACK.take();
    scheduler
        .spawn_with_stack(task1, &mut padded.stack, TaskConfig::default())
        .unwrap();

    let _ = scheduler.run();
    eprintln!("Overflow went unnoticed");
    std::process::exit(1);
}

fn task1() {
    crash(0);
}

#[allow(unconditional_recursion)]
fn crash(depth: usize) {
    let mut big = [depth as u8; 128];
    core::hint::black_box(&mut big);
    sleep(0).unwrap(); // Not to destroy critical data before being detected
    crash(depth + 1);
    core::hint::black_box(&big);
}
