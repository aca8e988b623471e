//! Sharded, work-stealing LRU buffer cache.
//!
//! `NBUF` buffers are carved up once at [`init`] and never created or
//! destroyed again. They live in `NBUCKET` buckets keyed by `blockno %
//! NBUCKET`; every buffer starts in bucket 0 and migrates to whichever
//! bucket its assigned block number hashes to; the steal path in `locate`
//! redistributes them across buckets under load.
use std::sync::OnceLock;

use array_macro::array;
use corelib::{SleepLock, Spinlock};
use log::trace;

use crate::buf::BufInner;
use crate::cpu::ticks;
use crate::disk::BlockDevice;
use crate::param::{NBUCKET, NBUF};

/// Bucket-owned metadata for one slot: identity, reference count, and LRU
/// timestamp. Protected by the owning bucket's spinlock, never by the
/// slot's own sleep-lock.
struct Slot {
    index: usize,
    dev: u32,
    blockno: u32,
    refcnt: u32,
    time: u64,
}

/// Picks the unreferenced slot with the smallest `time` in `slots`, keeping
/// the first one found on ties. Ties happen whenever two buffers are
/// released in the same tick; resolving them by scan order rather than by
/// last-writer makes eviction order independent of bucket layout.
fn pick_victim(slots: &[Slot]) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut best_time = u64::MAX;
    for (i, slot) in slots.iter().enumerate() {
        if slot.refcnt == 0 && slot.time < best_time {
            best_time = slot.time;
            best = Some(i);
        }
    }
    best
}

pub struct Bcache {
    buckets: [Spinlock<Vec<Slot>>; NBUCKET],
    payloads: Vec<SleepLock<BufInner>>,
    disk: &'static dyn BlockDevice,
}

static CACHE: OnceLock<Bcache> = OnceLock::new();

impl Bcache {
    fn new(disk: &'static dyn BlockDevice) -> Self {
        let payloads = (0..NBUF).map(|_| SleepLock::new("buffer", BufInner::new())).collect();
        let buckets = array![i => Spinlock::new(
            "bcache",
            if i == 0 {
                (0..NBUF)
                    .map(|index| Slot { index, dev: 0, blockno: 0, refcnt: 0, time: 0 })
                    .collect()
            } else {
                Vec::new()
            },
        ); NBUCKET];
        Bcache { buckets, payloads, disk }
    }
}

/// Builds the cache's `NBUF` buffers against `disk`, all initially resident
/// in bucket 0, and installs it as the process-wide singleton.
///
/// # Panics
/// Panics if called more than once.
pub fn init(disk: &'static dyn BlockDevice) -> &'static Bcache {
    CACHE
        .set(Bcache::new(disk))
        .unwrap_or_else(|_| panic!("bio::init called more than once"));
    CACHE.get().unwrap()
}

pub fn cache() -> &'static Bcache {
    CACHE.get().expect("bio::init was never called")
}

/// Builds an independent, non-singleton cache, leaked for a `'static`
/// lifetime. Used by tests that need a cache no other test can observe.
#[cfg(test)]
pub(crate) fn new_isolated(disk: &'static dyn BlockDevice) -> &'static Bcache {
    Box::leak(Box::new(Bcache::new(disk)))
}

/// A held buffer: the sleep-lock is acquired and `data` reflects disk
/// contents for the duration of its lifetime. Do not retain one past a
/// matching [`Bcache::release`] call.
pub struct Buf {
    cache: &'static Bcache,
    index: usize,
    pub dev: u32,
    pub blockno: u32,
    guard: Option<corelib::SleepLockGuard<'static, BufInner>>,
}

impl Buf {
    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().expect("buf: sleep-lock not held").data.inner
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard.as_mut().expect("buf: sleep-lock not held").data.inner
    }

    /// Convenience wrappers so a caller holding a `Buf` doesn't need to
    /// thread the cache reference back through separately.
    pub fn bwrite(&self) {
        self.cache.write(self);
    }

    pub fn pin(&self) {
        self.cache.pin(self);
    }

    pub fn unpin(&self) {
        self.cache.unpin(self);
    }

    pub fn release(self) {
        let cache = self.cache;
        cache.release(self);
    }
}

impl Bcache {
    /// Home bucket for `blockno`.
    fn home(&self, blockno: u32) -> usize {
        blockno as usize % NBUCKET
    }

    /// Finds or creates the slot for `(dev, blockno)`, returning its index
    /// and whether it was freshly assigned (and so needs a disk read
    /// regardless of any stale `valid` bit left over from its last use).
    fn locate(&self, dev: u32, blockno: u32) -> (usize, bool) {
        let k = self.home(blockno);
        let mut home = self.buckets[k].lock();

        if let Some(pos) = home.iter().position(|s| s.dev == dev && s.blockno == blockno) {
            home[pos].refcnt += 1;
            return (home[pos].index, false);
        }

        if let Some(pos) = pick_victim(&home) {
            let slot = &mut home[pos];
            slot.dev = dev;
            slot.blockno = blockno;
            slot.refcnt = 1;
            return (slot.index, true);
        }

        for j in (0..NBUCKET).filter(|&j| j != k) {
            let mut donor = self.buckets[j].lock();
            let Some(pos) = pick_victim(&donor) else {
                continue;
            };
            let mut slot = donor.swap_remove(pos);
            drop(donor);
            trace!("bio: bucket {k} stealing slot {} from bucket {j} for blockno={blockno}", slot.index);
            slot.dev = dev;
            slot.blockno = blockno;
            slot.refcnt = 1;
            let index = slot.index;
            home.push(slot);
            return (index, true);
        }

        panic!("bio: no buffer available to steal for dev={dev} blockno={blockno}");
    }

    /// Returns a buffer holding the current contents of `(dev, blockno)`,
    /// sleep-locked by the caller.
    pub fn read(&'static self, dev: u32, blockno: u32) -> Buf {
        let (index, fresh) = self.locate(dev, blockno);
        let mut guard = self.payloads[index].lock();
        if fresh {
            guard.valid = false;
        }
        if !guard.valid {
            self.disk.read(dev, blockno, &mut guard.data.inner);
            guard.valid = true;
        }
        Buf {
            cache: self,
            index,
            dev,
            blockno,
            guard: Some(guard),
        }
    }

    /// Writes `buf`'s contents to disk. The caller must hold the sleep-lock
    /// (true of any live [`Buf`]).
    pub fn write(&self, buf: &Buf) {
        let guard = buf.guard.as_ref().expect("bio::write: sleep-lock not held");
        self.disk.write(buf.dev, buf.blockno, &guard.data.inner);
    }

    /// Releases `buf`'s sleep-lock; if this was the last reference, stamps
    /// the LRU timestamp.
    pub fn release(&self, mut buf: Buf) {
        buf.guard = None;
        let k = self.home(buf.blockno);
        let mut bucket = self.buckets[k].lock();
        let slot = bucket
            .iter_mut()
            .find(|s| s.index == buf.index)
            .expect("bio::release: slot not in its home bucket");
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            slot.time = ticks();
        }
    }

    /// Increments `buf`'s reference count without touching the sleep-lock,
    /// pinning it against eviction.
    pub fn pin(&self, buf: &Buf) {
        let k = self.home(buf.blockno);
        let mut bucket = self.buckets[k].lock();
        let slot = bucket
            .iter_mut()
            .find(|s| s.index == buf.index)
            .expect("bio::pin: slot not in its home bucket");
        slot.refcnt += 1;
    }

    /// Reverses a [`Bcache::pin`].
    pub fn unpin(&self, buf: &Buf) {
        let k = self.home(buf.blockno);
        let mut bucket = self.buckets[k].lock();
        let slot = bucket
            .iter_mut()
            .find(|s| s.index == buf.index)
            .expect("bio::unpin: slot not in its home bucket");
        slot.refcnt -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use std::sync::Arc;
    use std::thread;

    fn fresh_cache() -> &'static Bcache {
        let disk: &'static MemDisk = Box::leak(Box::new(MemDisk::new()));
        new_isolated(disk)
    }

    #[test]
    fn read_then_release_reuses_the_same_slot() {
        let bc = fresh_cache();
        let buf = bc.read(0, 1000);
        let index = buf.index;
        bc.release(buf);
        let buf2 = bc.read(0, 1000);
        assert_eq!(buf2.index, index);
        bc.release(buf2);
    }

    #[test]
    fn write_then_read_round_trips_through_disk() {
        let bc = fresh_cache();
        let mut buf = bc.read(0, 1001);
        buf.data_mut()[0] = 0xab;
        buf.bwrite();
        buf.release();

        let buf2 = bc.read(0, 1001);
        assert_eq!(buf2.data()[0], 0xab);
        bc.release(buf2);
    }

    #[test]
    fn concurrent_readers_never_see_two_live_copies_of_one_block() {
        let bc = fresh_cache();
        let seen_indices = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen_indices = Arc::clone(&seen_indices);
                thread::spawn(move || {
                    let buf = bc.read(0, 2000);
                    seen_indices.lock().unwrap().push(buf.index);
                    thread::yield_now();
                    bc.release(buf);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let indices = seen_indices.lock().unwrap();
        assert!(indices.iter().all(|&i| i == indices[0]));
    }

    #[test]
    fn exclusion_serializes_two_readers_and_the_second_observes_the_first() {
        let bc = fresh_cache();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let buf = bc.read(0, 3000);
        let first_seen = Arc::clone(&seen);
        let second = {
            let bc_ref: &'static Bcache = bc;
            thread::spawn(move || {
                // Blocks on the sleep-lock until the first reader releases.
                let buf = bc_ref.read(0, 3000);
                first_seen.lock().unwrap().push(buf.data()[0]);
                bc_ref.release(buf);
            })
        };
        thread::sleep(std::time::Duration::from_millis(20));
        // The spawned reader must still be blocked: nothing has been pushed.
        assert!(seen.lock().unwrap().is_empty());

        let mut held = buf;
        held.data_mut()[0] = 0x7a;
        held.bwrite();
        held.release();

        second.join().unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[0x7a]);
    }

    #[test]
    fn stealing_succeeds_when_only_another_bucket_has_a_free_slot() {
        let bc = fresh_cache();

        // Every buffer starts resident in bucket 0. Pin all NBUF of them
        // with distinct blocks that all hash to bucket 0 (multiples of
        // NBUCKET), which resolves entirely through in-bucket victim
        // selection — nothing migrates out of bucket 0 yet.
        let mut pinned: Vec<Buf> = (0..NBUF as u32).map(|i| bc.read(0, i * NBUCKET as u32)).collect();

        // With every slot pinned and every other bucket empty, one more
        // distinct block hashing to 0 has nowhere to come from.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bc.read(0, NBUF as u32 * NBUCKET as u32)
        }));
        assert!(result.is_err(), "expected an over-subscribed cache to be fatal");

        // Release every pinned buffer, stamping strictly increasing release
        // times in the order released (index 0 first, so it carries the
        // smallest timestamp and is always the next victim picked).
        for buf in pinned.drain(..) {
            buf.release();
        }

        // Request NBUCKET - 1 distinct blocks that hash to buckets 1..NBUCKET,
        // each of which starts empty and so must steal from bucket 0 — the
        // only non-empty bucket — taking its lowest-timestamped (earliest
        // released) free slot each time.
        let migrated: Vec<Buf> = (1..NBUCKET as u32).map(|bucket| bc.read(0, bucket)).collect();
        for buf in migrated {
            buf.release();
        }

        // Bucket 0 now holds the NBUF - (NBUCKET - 1) slots with the
        // *largest* release timestamps from the first batch: those are
        // exactly the ones originally pinned last, i.e. index NBUCKET - 1
        // upward. Re-pin them all so bucket 0 is full again.
        let refilled: Vec<Buf> = ((NBUCKET - 1) as u32..NBUF as u32)
            .map(|i| bc.read(0, i * NBUCKET as u32))
            .collect();

        // Bucket 0 is full again, but bucket 1 holds exactly one
        // unreferenced slot (the first of the migrated buffers, released
        // above). A brand new block hashing to bucket 0 can now only be
        // satisfied by stealing that slot back from bucket 1.
        let stolen = bc.read(0, 1000 * NBUCKET as u32);
        assert_eq!(stolen.blockno % NBUCKET as u32, 0);
        stolen.release();
        for buf in refilled {
            buf.release();
        }
    }
}
