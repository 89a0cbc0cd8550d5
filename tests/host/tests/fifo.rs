//! Runnable tasks are dispatched in FIFO order, and `sleep(0)` sends a task to the back of the queue.


use stackette::{TaskConfig, scheduler, timer::sleep};

use crate::utils::{Trace, init_scheduler};

static TRACE: Trace<(char, u32), 16> = Trace::new();

fn worker(name: char) {
    for round in 0..3 {
        TRACE.record((name, round));
        sleep(0).unwrap();
    }
}

fn main() {
    let scheduler = init_scheduler();

    for name in ['x', 'y', 'z'] {
        scheduler
            .spawn(move || worker(name), TaskConfig::default())
            .unwrap();
    }

    // Spawned from a task, so it queues behind the others
    scheduler
        .spawn(
            || {
                scheduler::spawn(|| TRACE.record(('w', 0)), TaskConfig::default()).unwrap();
            },
            TaskConfig::default(),
        )
        .unwrap();

    scheduler.run().unwrap();

    assert_eq!(
        TRACE.events().as_slice(),
        [
            ('x', 0),
            ('y', 0),
            ('z', 0),
            ('x', 1),
            ('y', 1),
            ('z', 1),
            ('w', 0),
            ('x', 2),
            ('y', 2),
            ('z', 2),
        ]
    );
}
