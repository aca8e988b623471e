use std::sync::Arc;
use std::thread;
use std::time::Duration;

use corelib::{SleepLock, SleepableLock};

#[test]
fn sleeplock_serializes_long_holds() {
    let lock = Arc::new(SleepLock::new("data", 0u32));
    let mut handles = Vec::new();
    for i in 0..4u32 {
        let lock = Arc::clone(&lock);
        handles.push(thread::spawn(move || {
            let mut guard = lock.lock();
            let before = *guard;
            thread::sleep(Duration::from_millis(5));
            *guard = before + i + 1;
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    // Each holder read-then-wrote under exclusion, so the final value is the
    // sum of every increment with none lost to interleaving.
    assert_eq!(*lock.lock(), 1 + 2 + 3 + 4);
}

#[test]
fn sleepablelock_wakes_a_sleeping_waiter() {
    let lock = Arc::new(SleepableLock::new("flag", false));
    let waiter_lock = Arc::clone(&lock);
    let waiter = thread::spawn(move || {
        let mut guard = waiter_lock.lock();
        while !*guard {
            guard.sleep();
        }
    });

    // Give the waiter a chance to actually start sleeping before we wake it.
    thread::sleep(Duration::from_millis(20));
    {
        let mut guard = lock.lock();
        *guard = true;
        guard.wakeup();
    }

    waiter.join().unwrap();
}
