//! Sleeping tasks wake at their deadline, earliest deadline first.


use stackette::{
    Status, TaskConfig,
    scheduler,
    timer::{current_time, sleep, sleep_until},
};

use crate::utils::{Trace, init_scheduler};

static WAKE_UPS: Trace<(u64, u64), 8> = Trace::new();

fn sleeper(ticks: u64) {
    let start = current_time();
    sleep(ticks).unwrap();
    WAKE_UPS.record((ticks, current_time() - start));
}

fn main() {
    let scheduler = init_scheduler();

    for ticks in [30, 10, 20] {
        scheduler
            .spawn(move || sleeper(ticks), TaskConfig::default())
            .unwrap();
    }

    // A deadline in the past does not block for longer than one pass through the queue
    scheduler
        .spawn(
            || {
                sleep_until(0).unwrap();
                let handle = scheduler::current().unwrap();
                assert_eq!(handle.status().unwrap(), Status::Runnable);
                WAKE_UPS.record((0, current_time()));
            },
            TaskConfig::default(),
        )
        .unwrap();

    scheduler.run().unwrap();

    assert_eq!(
        WAKE_UPS.events().as_slice(),
        [(0, 0), (10, 10), (20, 20), (30, 30)]
    );
    assert_eq!(current_time(), 30);
    assert_eq!(scheduler.stats().unwrap().sleep_queue, 0);
}
