//! Spinlocks whose guards can put the holder to sleep.
//!
//! A plain spinlock plus a [`WaitChannel`] the guard can sleep on and wake.
use crate::spinlock::RawSpinlock;
use crate::{RawLock, WaitChannel};

pub struct RawSleepableLock {
    lock: RawSpinlock,
    pub(crate) waitchannel: WaitChannel,
}

impl RawSleepableLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            waitchannel: WaitChannel::new(),
        }
    }

    pub(crate) fn waitchannel(&self) -> &WaitChannel {
        &self.waitchannel
    }
}

impl RawLock for RawSleepableLock {
    fn acquire(&self) {
        self.lock.acquire();
    }

    fn release(&self) {
        self.lock.release();
    }

    fn holding(&self) -> bool {
        self.lock.holding()
    }
}
