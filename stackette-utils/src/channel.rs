//! Bounded FIFO channel between tasks.
//!
//! A task sending to a full channel, or receiving from an empty one, is suspended until the other side makes
//! room or delivers. The non-blocking variants never suspend, so interrupt handlers may use them.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use stackette::{Error, wait::WaitList};

pub struct Channel<T, const N: usize> {
    buffer: Mutex<RefCell<Deque<T, N>>>,
    /// Tasks waiting for a value.
    receivers: WaitList,
    /// Tasks waiting for room.
    senders: WaitList,
}

impl<T, const N: usize> Channel<T, N> {
    pub const fn new() -> Self {
        Self {
            buffer: Mutex::new(RefCell::new(Deque::new())),
            receivers: WaitList::new(),
            senders: WaitList::new(),
        }
    }

    /// Appends `value`, suspending the current task while the channel is full.
    pub fn send(&self, value: T) -> Result<(), Error> {
        let mut value = value;
        loop {
            value = match self.try_send(value) {
                Ok(()) => return Ok(()),
                Err(value) => value,
            };
            self.senders
                .block_current_if(|cs| self.buffer.borrow_ref(cs).is_full())?;
        }
    }

    /// Takes the oldest value, suspending the current task while the channel is empty.
    pub fn receive(&self) -> Result<T, Error> {
        loop {
            if let Some(value) = self.try_receive() {
                return Ok(value);
            }
            self.receivers
                .block_current_if(|cs| self.buffer.borrow_ref(cs).is_empty())?;
        }
    }

    /// Appends `value` if there is room. Otherwise hands it back.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        critical_section::with(|cs| self.buffer.borrow_ref_mut(cs).push_back(value))?;
        self.receivers.wake_one();
        Ok(())
    }

    pub fn try_receive(&self) -> Option<T> {
        let value = critical_section::with(|cs| self.buffer.borrow_ref_mut(cs).pop_front())?;
        self.senders.wake_one();
        Some(value)
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.buffer.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, const N: usize> Default for Channel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
