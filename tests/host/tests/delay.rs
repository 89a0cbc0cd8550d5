//! `Delay` sleeps for whole ticks, rounded up from the requested duration.


use embedded_hal::delay::DelayNs;
use stackette::{SchedulerConfig, TaskConfig, timer::current_time};
use stackette_utils::Delay;

use crate::utils::{Trace, init_scheduler_with};

static ELAPSED: Trace<u64, 4> = Trace::new();

fn main() {
    let scheduler = init_scheduler_with(SchedulerConfig::default().with_tick_freq(1000));

    scheduler
        .spawn(
            || {
                let mut delay = Delay::new().unwrap();
                assert_eq!(delay.to_ticks(u32::MAX, 1_000), u32::MAX as u64);

                let start = current_time();
                delay.delay_ms(5);
                ELAPSED.record(current_time() - start);

                let start = current_time();
                delay.delay_us(1500);
                ELAPSED.record(current_time() - start);

                let start = current_time();
                delay.delay_ns(1);
                ELAPSED.record(current_time() - start);
            },
            TaskConfig::default(),
        )
        .unwrap();

    scheduler.run().unwrap();

    assert_eq!(ELAPSED.events().as_slice(), [5, 2, 1]);
}
