//! Busy-waiting mutual exclusion.
//!
//! An atomic compare-exchange loop recording which holder owns the lock,
//! wrapped in a `push_off`/`pop_off` preemption-disable counter. On bare
//! metal that counter gates hardware interrupts so a timer interrupt can't
//! preempt a thread mid-critical-section; hosted on top of OS threads there
//! is no interrupt line to mask, so `push_off`/`pop_off` here only keep the
//! nesting-counter contract (CPU id must be read inside a preemption-disabled
//! region) without pretending to provide real-time preemption guarantees a
//! hosted test binary cannot give.
use std::cell::Cell;
use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::RawLock;

thread_local! {
    static PUSH_OFF_DEPTH: Cell<u32> = Cell::new(0);
    static THREAD_TOKEN: Cell<u64> = Cell::new(0);
}

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|cell| {
        let existing = cell.get();
        if existing != 0 {
            return existing;
        }
        let fresh = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        cell.set(fresh);
        fresh
    })
}

/// Disables preemption for the calling thread. Matched with [`pop_off`].
pub fn push_off() {
    PUSH_OFF_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

/// Re-enables preemption once every matching [`push_off`] has been undone.
pub fn pop_off() {
    PUSH_OFF_DEPTH.with(|depth| {
        let d = depth.get();
        assert!(d > 0, "pop_off: unmatched with push_off");
        depth.set(d - 1);
    });
}

/// Mutual exclusion lock that busy-waits.
pub struct RawSpinlock {
    name: &'static str,
    locked: AtomicBool,
    /// Token of the holding thread, or 0 if unlocked. Recorded purely for
    /// `holding()`/debugging.
    holder: AtomicU64,
}

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: AtomicU64::new(0),
        }
    }
}

impl RawLock for RawSpinlock {
    fn acquire(&self) {
        push_off();
        assert!(!self.holding(), "acquire: already holding {}", self.name);
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        self.holder.store(thread_token(), Ordering::Relaxed);
    }

    fn release(&self) {
        assert!(self.holding(), "release: not holding {}", self.name);
        self.holder.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        pop_off();
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.holder.load(Ordering::Relaxed) == thread_token()
    }
}
