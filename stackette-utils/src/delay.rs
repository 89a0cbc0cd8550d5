//! `embedded-hal`-compatible delay that yields CPU to other tasks instead of busy looping.
//! The precision is limited by the tick frequency setting of the scheduler (usually order of a millisecond or more).
use stackette::{Error, scheduler::get_config, timer::sleep};

#[derive(Clone)]
pub struct Delay {
    tick_freq: u32,
}

impl Delay {
    pub fn new() -> Result<Self, Error> {
        let tick_freq = get_config()?.tick_freq;

        Ok(Self { tick_freq })
    }

    pub fn delay_ticks(&mut self, ticks: u64) {
        sleep(ticks).unwrap_or_else(|err| panic!("Failed to sleep: {}", err));
    }

    /// Converts a duration in `1 / units_per_sec` seconds to ticks, rounding up.
    pub fn to_ticks(&self, duration: u32, units_per_sec: u64) -> u64 {
        (duration as u64 * self.tick_freq as u64).div_ceil(units_per_sec)
    }
}

impl embedded_hal::delay::DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_ticks(self.to_ticks(ns, 1_000_000_000));
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_ticks(self.to_ticks(us, 1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay_ticks(self.to_ticks(ms, 1_000));
    }
}

