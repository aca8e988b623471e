//! Group-commit write-ahead log.
//!
//! A transaction bundles the block writes of one or more concurrent
//! callers. The log only ever commits when no transaction is open, so
//! commit never has to reason about a partially-written caller. The
//! on-disk layout is a header block (block numbers for every logged slot)
//! followed by that many log-slot blocks; recovery replays whatever the
//! header says was committed and then clears it.
//!
//! `begin_op`/`end_op` admission control, `log_write` absorption, and the
//! write-log / seal-header / install / clear-header commit sequence follow
//! the classic group-commit redo-log shape; the on-disk header encoding
//! goes through `zerocopy` instead of a raw struct cast.
use std::sync::OnceLock;

use corelib::SleepableLock;
use log::{debug, trace};
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{Bcache, Buf};
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};

/// The on-disk encoding of the log header block: a count followed by that
/// many home block numbers. Declared `repr(C)` with only `u32` fields so it
/// has no padding and a stable little-endian-on-disk layout is just "the
/// host's native encoding" on every platform this crate targets.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct RawLogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

const_assert!(std::mem::size_of::<RawLogHeader>() < BSIZE);

/// In-memory mirror of the pending transaction's header.
#[derive(Clone, Copy)]
struct LogHeader {
    n: usize,
    block: [u32; LOGSIZE],
}

impl LogHeader {
    const fn empty() -> Self {
        Self { n: 0, block: [0; LOGSIZE] }
    }
}

struct LogMutable {
    outstanding: usize,
    committing: bool,
    header: LogHeader,
}

pub struct Log {
    dev: u32,
    start: u32,
    size: u32,
    state: SleepableLock<LogMutable>,
    bc: &'static Bcache,
}

static LOG: OnceLock<Log> = OnceLock::new();

/// Builds the log against `bc`, reads `start`/`size` the way `initlog`
/// reads them from the superblock, and runs recovery once before returning.
///
/// # Panics
/// Panics if called more than once.
pub fn init(bc: &'static Bcache, dev: u32, start: u32, size: u32) -> &'static Log {
    let log = Log {
        dev,
        start,
        size,
        state: SleepableLock::new(
            "log",
            LogMutable {
                outstanding: 0,
                committing: false,
                header: LogHeader::empty(),
            },
        ),
        bc,
    };
    LOG.set(log).unwrap_or_else(|_| panic!("log::init called more than once"));
    let log = LOG.get().unwrap();
    log.recover_from_log();
    log
}

pub fn log() -> &'static Log {
    LOG.get().expect("log::init was never called")
}

impl Log {
    fn log_slot(&self, tail: usize) -> u32 {
        self.start + 1 + tail as u32
    }

    fn read_head(&self) -> LogHeader {
        let buf = self.bc.read(self.dev, self.start);
        let raw = RawLogHeader::read_from_prefix(buf.data())
            .expect("log: header block shorter than the on-disk header layout");
        buf.release();
        LogHeader { n: raw.n as usize, block: raw.block }
    }

    /// The true commit point: sealing this write durably records (or, with
    /// `n == 0`, durably clears) the pending transaction.
    fn write_head(&self, header: &LogHeader) {
        let mut buf = self.bc.read(self.dev, self.start);
        let raw = RawLogHeader {
            n: header.n as u32,
            block: header.block,
        };
        assert!(raw.write_to_prefix(buf.data_mut()), "log: header block too small to hold the on-disk header layout");
        buf.bwrite();
        buf.release();
    }

    /// Copies every logged slot to its home location. `recovering` is only
    /// `false` during an ordinary commit, where each home block was pinned
    /// by `log_write` and must be unpinned once installed; recovery never
    /// pinned anything, since no transaction's `log_write` ran this boot.
    fn install_trans(&self, header: &LogHeader, recovering: bool) {
        for tail in 0..header.n {
            let log_buf = self.bc.read(self.dev, self.log_slot(tail));
            let mut home_buf = self.bc.read(self.dev, header.block[tail]);
            home_buf.data_mut().copy_from_slice(log_buf.data());
            home_buf.bwrite();
            if !recovering {
                home_buf.unpin();
            }
            log_buf.release();
            home_buf.release();
        }
    }

    fn write_log(&self, header: &LogHeader) {
        for tail in 0..header.n {
            let from = self.bc.read(self.dev, header.block[tail]);
            let mut to = self.bc.read(self.dev, self.log_slot(tail));
            to.data_mut().copy_from_slice(from.data());
            to.bwrite();
            from.release();
            to.release();
        }
    }

    fn recover_from_log(&self) {
        let header = self.read_head();
        debug!("log: recovering {} block(s) from a prior commit", header.n);
        self.install_trans(&header, true);
        self.write_head(&LogHeader::empty());
    }

    /// Runs the full commit sequence for `header`. Called with no
    /// transaction open and `committing` already set, so nothing else
    /// touches the in-memory header meanwhile.
    fn commit(&self, header: &LogHeader) {
        if header.n == 0 {
            return;
        }
        debug!("log: committing {} block(s)", header.n);
        self.write_log(header);
        self.write_head(header);
        self.install_trans(header, false);
        self.write_head(&LogHeader::empty());
        trace!("log: commit sealed and installed");
    }

    /// Opens a transaction, blocking while a commit is in progress or while
    /// admitting it could risk overflowing the log.
    pub fn begin_op(&self) {
        let mut guard = self.state.lock();
        loop {
            let would_overflow = guard.header.n + (guard.outstanding + 1) * MAXOPBLOCKS > LOGSIZE;
            if guard.committing || would_overflow {
                guard.sleep();
            } else {
                guard.outstanding += 1;
                return;
            }
        }
    }

    /// Closes a transaction, committing if it was the last one open.
    pub fn end_op(&self) {
        let commit_header = {
            let mut guard = self.state.lock();
            guard.outstanding -= 1;
            assert!(!guard.committing, "log: committing while a transaction is still outstanding");
            if guard.outstanding == 0 {
                guard.committing = true;
                Some(guard.header)
            } else {
                // Shrinking `outstanding` freed up reserved log space that a
                // waiting `begin_op` might now fit in.
                guard.wakeup();
                None
            }
        };
        let Some(header) = commit_header else {
            return;
        };
        self.commit(&header);
        let mut guard = self.state.lock();
        guard.header.n = 0;
        guard.committing = false;
        guard.wakeup();
    }

    /// Records that `buf` must be durably installed by the next commit.
    /// `buf` must already be sleep-locked by the caller.
    pub fn log_write(&self, buf: &Buf) {
        let mut guard = self.state.lock();
        assert!(guard.outstanding >= 1, "log_write: called outside of a transaction");
        assert!(guard.header.n < LOGSIZE, "log_write: transaction too big for LOGSIZE");
        assert!((guard.header.n as u32) < self.size.saturating_sub(1), "log_write: transaction too big for the log region");

        let already_logged = guard.header.block[..guard.header.n].iter().any(|&b| b == buf.blockno);
        if !already_logged {
            let n = guard.header.n;
            guard.header.block[n] = buf.blockno;
            guard.header.n += 1;
            drop(guard);
            buf.pin();
        } else {
            trace!("log_write: blockno={} already logged this transaction, absorbing", buf.blockno);
        }
    }
}
