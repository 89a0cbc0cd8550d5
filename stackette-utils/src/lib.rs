#![no_std]

pub mod channel;
pub mod delay;

pub use channel::Channel;
pub use delay::Delay;
