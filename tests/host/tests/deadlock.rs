//! Tasks that wait on channels nobody will ever touch are reported as a deadlock instead of hanging the loop.


use stackette::{Error, Status, TaskConfig, scheduler, timer::sleep, wait::WaitList};
use stackette_utils::Channel;

use crate::utils::init_scheduler;

static CHANNEL: Channel<u32, 4> = Channel::new();
static NEVER: WaitList = WaitList::new();

fn main() {
    let scheduler = init_scheduler();

    let receiver = scheduler
        .spawn(
            || {
                let _ = CHANNEL.receive();
                unreachable!("nothing was ever sent");
            },
            TaskConfig::default(),
        )
        .unwrap();
    let waiter = scheduler
        .spawn(
            || {
                sleep(3).unwrap();
                NEVER.block_current().unwrap();
            },
            TaskConfig::default(),
        )
        .unwrap();
    // Abandoning itself is not a deadlock of the whole system
    scheduler
        .spawn(
            || {
                scheduler::deadlock();
            },
            TaskConfig::default(),
        )
        .unwrap();

    assert_eq!(scheduler.run(), Err(Error::Deadlock));

    assert_eq!(receiver.status().unwrap(), Status::WaitingOnChannel);
    assert_eq!(waiter.status().unwrap(), Status::WaitingOnChannel);
    let stats = scheduler.stats().unwrap();
    assert_eq!(stats.tasks, 2);
    assert_eq!(stats.waiting, 2);
    assert_eq!(stats.run_queue, 0);
    assert_eq!(NEVER.len(), 1);

    // Reported again, never resumed
    assert_eq!(scheduler.step(), Err(Error::Deadlock));

    drop(scheduler);
    assert!(stackette_host::init_scheduler(Default::default()).is_some());
}
