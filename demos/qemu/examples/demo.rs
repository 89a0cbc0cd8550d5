#![no_std]
#![no_main]

use cortex_m_semihosting::debug;
use embedded_hal::delay::DelayNs;
use heapless::String;
use log::info;
use panic_semihosting as _;
use stackette::{SchedulerConfig, Stack, TaskConfig, timer::current_time};
use stackette_cortex_m::init_scheduler;
use stackette_utils::{Channel, Delay};
use static_cell::ConstStaticCell;

static LOGGER: Logger = Logger;

static PRODUCER_STACK: ConstStaticCell<Stack<8192>> = ConstStaticCell::new(Stack::new());
static CONSUMER_STACK: ConstStaticCell<Stack<8192>> = ConstStaticCell::new(Stack::new());
static BLINKER_STACK: ConstStaticCell<Stack<4096>> = ConstStaticCell::new(Stack::new());

static WORDS: Channel<String<8>, 2> = Channel::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(log::LevelFilter::Debug);

    info!("Started");

    let peripherals = cortex_m::Peripherals::take().unwrap();
    let scheduler = init_scheduler(
        peripherals.SYST,
        12_000_000,
        SchedulerConfig::default().with_tick_freq(100),
    )
    .unwrap();

    let _producer = scheduler
        .spawn_with_stack(
            || {
                for word in ["aaaa", "bbbb", "cccc", "dddd", "eeee"] {
                    info!("producer sends {} at {}", word, current_time());
                    WORDS.send(String::try_from(word).unwrap()).unwrap();
                }
            },
            PRODUCER_STACK.take(),
            TaskConfig::default(),
        )
        .unwrap();

    // Ticks in the background; abandoned once the consumer (the main task) is done
    let _blinker = scheduler
        .spawn_with_stack(
            || {
                let mut delay = Delay::new().unwrap();
                let mut i = 0;
                loop {
                    info!("blink {}", i);
                    i += 1;
                    delay.delay_ms(30);
                }
            },
            BLINKER_STACK.take(),
            TaskConfig::default(),
        )
        .unwrap();

    let _consumer = scheduler
        .spawn_with_stack(
            || {
                let mut delay = Delay::new().unwrap();
                for _ in 0..5 {
                    let word = WORDS.receive().unwrap();
                    info!("consumer got {} at {}", word, current_time());
                    delay.delay_ms(50);
                }
            },
            CONSUMER_STACK.take(),
            TaskConfig::default().as_main(),
        )
        .unwrap();

    match scheduler.run() {
        Ok(()) => {
            info!("Finished");
            debug::exit(debug::EXIT_SUCCESS);
        }
        Err(err) => {
            info!("Scheduler stopped: {}", err);
            debug::exit(debug::EXIT_FAILURE);
        }
    }

    loop {
        cortex_m::asm::wfi();
    }
}

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Trace
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            cortex_m_semihosting::hprintln!(
                "[{} t={}] {}: {}",
                record.level(),
                current_time(),
                record.target(),
                record.args()
            )
        }
    }

    fn flush(&self) {}
}
