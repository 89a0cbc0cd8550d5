//! With external events enabled, waiting tasks keep the loop idling until an "interrupt" wakes them.


use std::sync::atomic::{AtomicU64, Ordering};

use stackette::{Progress, SchedulerConfig, TaskConfig, timer::current_time, wait::WaitList};

use crate::utils::init_scheduler_with;

const EVENT_TIME: u64 = 5;

static EVENT: WaitList = WaitList::new();
static WOKEN_AT: AtomicU64 = AtomicU64::new(0);

fn interrupt() {
    if current_time() >= EVENT_TIME {
        EVENT.wake_one();
    }
}

fn main() {
    let scheduler = init_scheduler_with(SchedulerConfig::default().with_external_events(true));

    let task = scheduler
        .spawn(
            || {
                EVENT.block_current().unwrap();
                WOKEN_AT.store(current_time(), Ordering::SeqCst);
            },
            TaskConfig::default(),
        )
        .unwrap();

    assert_eq!(scheduler.step().unwrap(), Progress::Ran(task));
    // Would be a deadlock without external events
    assert_eq!(scheduler.step().unwrap(), Progress::Idle);

    stackette_host::set_event_hook(Some(interrupt));
    scheduler.run().unwrap();

    assert_eq!(WOKEN_AT.load(Ordering::SeqCst), EVENT_TIME);
    assert!(EVENT.is_empty());
}
