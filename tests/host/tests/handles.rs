//! Task handles report the state of their task and become stale once it is gone.


use stackette::{Error, Status, TaskConfig, TaskHandle, scheduler, timer::sleep};

use crate::utils::init_scheduler;

fn main() {
    let scheduler = init_scheduler();

    assert_eq!(scheduler::current(), Err(Error::NotInTask));

    let sleeper = scheduler
        .spawn(|| sleep(7).unwrap(), TaskConfig::default())
        .unwrap();
    assert_eq!(sleeper.status().unwrap(), Status::Runnable);

    let observer = scheduler
        .spawn(
            move || {
                let me = scheduler::current().unwrap();
                assert_ne!(me, sleeper);
                assert_eq!(me.status().unwrap(), Status::Runnable);

                assert_eq!(sleeper.status().unwrap(), Status::Sleeping { until: 7 });
                // Only tasks waiting on a channel can be re-activated
                assert_eq!(sleeper.reactivate(), Err(Error::NotBlocked));
                assert_eq!(me.reactivate(), Err(Error::NotBlocked));
                assert_eq!(scheduler::stats().unwrap().run_queue, 0);
            },
            TaskConfig::default(),
        )
        .unwrap();

    scheduler.run().unwrap();

    for handle in [sleeper, observer] {
        assert_eq!(handle.status(), Err(Error::NotFound));
        assert_eq!(handle.reactivate(), Err(Error::NotFound));
    }

    // A new task in a recycled slot is told apart from the old one
    let newcomer: TaskHandle = scheduler.spawn(|| {}, TaskConfig::default()).unwrap();
    assert_eq!(newcomer.id(), sleeper.id());
    assert_ne!(newcomer, sleeper);
    assert_eq!(newcomer.status().unwrap(), Status::Runnable);
    assert_eq!(sleeper.status(), Err(Error::NotFound));
}
