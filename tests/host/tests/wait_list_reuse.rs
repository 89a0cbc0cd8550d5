//! Wait lists keep working when their entries go stale: after the scheduler is re-initialized, and after a
//! waiter is re-activated directly instead of through the list.


use stackette::{Error, TaskConfig, timer::sleep, wait::WaitList};
use stackette_utils::Channel;

use crate::utils::{Trace, init_scheduler};

static CHANNEL: Channel<u32, 4> = Channel::new();
static RECEIVED: Trace<u32, 4> = Trace::new();

static GATE: WaitList = WaitList::new();
static TRACE: Trace<&'static str, 8> = Trace::new();

fn main() {
    // Leaves a waiter behind in the channel
    {
        let scheduler = init_scheduler();
        scheduler
            .spawn(
                || {
                    let _ = CHANNEL.receive();
                },
                TaskConfig::default(),
            )
            .unwrap();
        assert_eq!(scheduler.run(), Err(Error::Deadlock));
    }

    // The new tasks reuse the slots of the old ones
    {
        let scheduler = init_scheduler();
        scheduler
            .spawn(|| sleep(5).unwrap(), TaskConfig::default())
            .unwrap();
        scheduler
            .spawn(
                || RECEIVED.record(CHANNEL.receive().unwrap()),
                TaskConfig::default(),
            )
            .unwrap();
        scheduler
            .spawn(|| CHANNEL.send(42).unwrap(), TaskConfig::default())
            .unwrap();

        assert_eq!(scheduler.run(), Ok(()));
        assert_eq!(RECEIVED.events().as_slice(), [42]);
        assert!(CHANNEL.is_empty());
    }

    // A waiter re-activated directly is skipped by the list, and the one behind it is woken
    {
        let scheduler = init_scheduler();
        let first = scheduler
            .spawn(
                || {
                    GATE.block_current().unwrap();
                    TRACE.record("first woke");
                    sleep(5).unwrap();
                    TRACE.record("first done");
                },
                TaskConfig::default(),
            )
            .unwrap();
        scheduler
            .spawn(
                || {
                    GATE.block_current().unwrap();
                    TRACE.record("second woke");
                },
                TaskConfig::default(),
            )
            .unwrap();
        scheduler
            .spawn(move || first.reactivate().unwrap(), TaskConfig::default())
            .unwrap();
        scheduler
            .spawn(
                || {
                    sleep(1).unwrap();
                    assert!(GATE.wake_one());
                    assert!(!GATE.wake_one());
                },
                TaskConfig::default(),
            )
            .unwrap();

        assert_eq!(scheduler.run(), Ok(()));
        assert_eq!(
            TRACE.events().as_slice(),
            ["first woke", "second woke", "first done"]
        );
        assert!(GATE.is_empty());
    }
}
