//! Generic lock and wait-channel primitives.
//!
//! This crate knows nothing about buffers, logs, or pages. It only provides
//! the two lock flavors and the sleep/wakeup channel that the kernel crate's
//! buffer cache, log, and page allocator are built on top of: a busy-waiting
//! [`RawSpinlock`] and a blocking [`RawSleeplock`]/[`RawSleepableLock`],
//! unified behind a single generic [`Lock`]/[`Guard`] pair so call sites
//! never care which strategy is plugged in.

mod sleepablelock;
mod sleeplock;
mod spinlock;
mod waitchannel;

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub use sleepablelock::RawSleepableLock;
pub use sleeplock::RawSleeplock;
pub use spinlock::{pop_off, push_off, RawSpinlock};
pub use waitchannel::WaitChannel;

/// A lock that can be acquired, released, and queried for ownership.
///
/// Implementors decide *how* a caller waits for the lock (busy-wait or
/// blocking); [`Lock`] and [`Guard`] supply the generic `data: T` wrapper on
/// top of whichever strategy is plugged in.
pub trait RawLock {
    fn acquire(&self);
    fn release(&self);
    fn holding(&self) -> bool;
}

/// Lock guards that can be temporarily released while sleeping on a
/// [`WaitChannel`] and re-acquired afterwards.
///
/// # Safety
///
/// `raw_release` and `raw_acquire` must always be used as a strictly nested
/// pair: release, wait, then re-acquire before touching the guarded data
/// again.
pub trait Waitable {
    unsafe fn raw_release(&mut self);
    unsafe fn raw_acquire(&mut self);
}

/// A `T` protected by a `R: RawLock`.
pub struct Lock<R: RawLock, T> {
    lock: R,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `lock`.
unsafe impl<R: RawLock + Send, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    /// Acquires the lock, blocking or spinning according to `R`'s strategy.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.lock.acquire();
        Guard { lock: self }
    }

    /// Returns whether the calling thread currently holds the lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    /// Returns a raw pointer to the inner data.
    ///
    /// The caller must ensure mutual exclusion; this bypasses the lock.
    pub fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Returns a mutable reference, available without locking since `&mut
    /// self` already proves exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// A held [`Lock`]. Releases the lock when dropped.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the lock is held for the lifetime of the guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the lock is held for the lifetime of the guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<R: RawLock, T> Waitable for Guard<'_, R, T> {
    unsafe fn raw_release(&mut self) {
        self.lock.lock.release();
    }

    unsafe fn raw_acquire(&mut self) {
        self.lock.lock.acquire();
    }
}

/// Locks that busy-wait (spin).
pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

/// Locks that block the calling thread instead of spinning.
pub type SleepLock<T> = Lock<RawSleeplock, T>;
pub type SleepLockGuard<'s, T> = Guard<'s, RawSleeplock, T>;

/// Spinlocks whose guards can additionally [`sleep`](SleepableLockGuard::sleep).
pub type SleepableLock<T> = Lock<RawSleepableLock, T>;
pub type SleepableLockGuard<'s, T> = Guard<'s, RawSleepableLock, T>;

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T> SleepableLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSleepableLock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSleeplock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}

static_assertions::assert_impl_all!(Spinlock<u8>: Sync);
static_assertions::assert_impl_all!(SleepLock<u8>: Sync);
static_assertions::assert_impl_all!(SleepableLock<u8>: Sync);

impl<T> SleepableLockGuard<'_, T> {
    /// Atomically releases the spinlock and sleeps on its wait channel.
    /// Reacquires the spinlock before returning.
    pub fn sleep(&mut self) {
        let waitchannel = self.lock.lock.waitchannel();
        waitchannel.sleep(self);
    }

    /// Wakes every thread sleeping on this lock's wait channel.
    pub fn wakeup(&self) {
        self.lock.lock.waitchannel().wakeup();
    }
}
