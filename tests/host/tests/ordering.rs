//! A task blocked in `sleep` lets the next task run before its deadline elapses.


use stackette::{TaskConfig, timer::sleep};

use crate::utils::{Trace, init_scheduler};

static TRACE: Trace<&'static str, 8> = Trace::new();

fn main() {
    let scheduler = init_scheduler();

    scheduler
        .spawn(
            || {
                TRACE.record("a");
                sleep(10).unwrap();
                TRACE.record("c");
            },
            TaskConfig::default(),
        )
        .unwrap();
    scheduler
        .spawn(|| TRACE.record("b"), TaskConfig::default())
        .unwrap();

    scheduler.run().unwrap();

    assert_eq!(TRACE.events().as_slice(), ["a", "b", "c"]);
}
