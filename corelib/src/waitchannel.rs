//! Address-keyed sleep/wakeup channels: `sleep(chan, lock)` atomically
//! releases `lock` and suspends; `wakeup(chan)` wakes every sleeper. A
//! bare-metal kernel implements the suspend/resume itself by changing a
//! process's scheduler state; hosted, there is no scheduler to hand off to,
//! so each channel owns a real OS condition variable instead — the same
//! "park on an address, unpark on that address" shape as
//! `sparking-lot-core`'s `park`/`unpark_one`, collapsed to a single channel
//! per `WaitChannel` rather than a global address-hashed table, since every
//! caller here already owns a distinct channel per lock.
use std::sync::{Condvar, Mutex};

use crate::Waitable;

pub struct WaitChannel {
    /// Paired with `cv` purely to give `Condvar::wait` something to hold;
    /// the real mutual exclusion is `lk`, released/reacquired around the
    /// wait by the caller via `Waitable`.
    gate: Mutex<()>,
    cv: Condvar,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Atomically releases `lk` and sleeps on this channel. Reacquires `lk`
    /// before returning.
    ///
    /// No wakeup can be lost between `lk.raw_release()` and the condition
    /// variable wait: `gate` is held across both, and [`wakeup`](Self::wakeup)
    /// also acquires `gate` before notifying, so a wakeup racing with a
    /// sleeper either happens strictly before the sleeper starts waiting
    /// (and is not missed, since the predicate recheck loop in the caller
    /// will see it) or strictly after (and the sleeper is parked in time to
    /// observe the notification).
    pub fn sleep<T: Waitable>(&self, lk: &mut T) {
        let guard = self.gate.lock().expect("WaitChannel gate poisoned");
        // SAFETY: `lk` is re-acquired below before this function returns,
        // and `lk` is not touched while released.
        unsafe { lk.raw_release() };
        let _guard = self.cv.wait(guard).expect("WaitChannel gate poisoned");
        drop(_guard);
        // SAFETY: paired with the `raw_release` above.
        unsafe { lk.raw_acquire() };
    }

    /// Wakes every thread currently sleeping on this channel.
    pub fn wakeup(&self) {
        let _guard = self.gate.lock().expect("WaitChannel gate poisoned");
        self.cv.notify_all();
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}
