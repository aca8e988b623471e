//! The disk collaborator: `disk_rw(buf, write?)`.
//!
//! A real block device driver (virtio or otherwise) is out of scope for
//! this crate. [`BlockDevice`] is the trait the buffer cache and log are
//! written against; [`MemDisk`] is the one implementation this crate ships,
//! an in-memory stand-in used by every test. Disk failure is assumed away:
//! `disk_rw` either succeeds or panics.
use std::sync::Mutex;

use crate::param::BSIZE;

/// A synchronous block device: reads and writes fixed-size blocks.
///
/// Implementations may sleep (a real driver would, waiting on an
/// interrupt).
pub trait BlockDevice: Send + Sync {
    fn read(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]);
    fn write(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]);
}

/// An in-memory block device, keyed by `(dev, blockno)`. Blocks read before
/// ever being written come back zeroed.
pub struct MemDisk {
    blocks: Mutex<std::collections::HashMap<(u32, u32), [u8; BSIZE]>>,
}

impl MemDisk {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Seeds a block's contents without going through the normal write
    /// path, for test setup (e.g. priming a committed-but-not-installed log
    /// region to exercise crash recovery).
    pub fn seed(&self, dev: u32, blockno: u32, data: [u8; BSIZE]) {
        self.blocks
            .lock()
            .expect("MemDisk poisoned")
            .insert((dev, blockno), data);
    }

    /// Reads a block directly, bypassing the buffer cache, for test
    /// assertions on final on-disk state.
    pub fn peek(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .expect("MemDisk poisoned")
            .get(&(dev, blockno))
            .copied()
            .unwrap_or([0; BSIZE])
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemDisk {
    fn read(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]) {
        let blocks = self.blocks.lock().expect("MemDisk poisoned");
        match blocks.get(&(dev, blockno)) {
            Some(contents) => data.copy_from_slice(contents),
            None => data.fill(0),
        }
    }

    fn write(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.blocks
            .lock()
            .expect("MemDisk poisoned")
            .insert((dev, blockno), *data);
    }
}
