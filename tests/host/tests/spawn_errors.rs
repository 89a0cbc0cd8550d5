//! Failures while spawning are reported to the caller and leave the scheduler usable.


use stackette::{Error, TaskConfig, scheduler};

use crate::utils::init_scheduler;

const MAX_NUM_TASKS: usize = 32;

fn main() {
    // Nothing to spawn into yet
    assert_eq!(
        scheduler::spawn(|| {}, TaskConfig::default().with_stack_size(4096)).unwrap_err(),
        Error::NotInitialized
    );

    let scheduler = init_scheduler();

    assert_eq!(
        scheduler
            .spawn(
                || {},
                TaskConfig::default().with_stack_size(isize::MAX as usize / 2)
            )
            .unwrap_err(),
        Error::OutOfMemory
    );
    assert_eq!(
        scheduler
            .spawn(|| {}, TaskConfig::default().with_stack_size(64))
            .unwrap_err(),
        Error::StackTooSmall
    );

    let mut handles = Vec::new();
    for _ in 0..MAX_NUM_TASKS {
        handles.push(scheduler.spawn(|| {}, TaskConfig::default()).unwrap());
    }
    assert_eq!(
        scheduler.spawn(|| {}, TaskConfig::default()).unwrap_err(),
        Error::TaskFull
    );
    assert_eq!(scheduler.stats().unwrap().tasks, MAX_NUM_TASKS);

    scheduler.run().unwrap();

    // Slots are free again
    let handle = scheduler.spawn(|| {}, TaskConfig::default()).unwrap();
    assert!(!handles.contains(&handle));
    scheduler.run().unwrap();
    assert_eq!(scheduler.stats().unwrap().tasks, 0);

    assert!(stackette_host::init_scheduler(Default::default()).is_none());
}
