//! The block slot pool.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::AlignedBuffer;
use crate::file_index::FileIndex;

/// Index into the fixed slot array; stable for the slot's entire lifetime.
pub(crate) type SlotId = usize;

/// Sentinel meaning "no block" — the all-ones value, never a real `bid`.
pub const BLK_NOT_FOUND: u64 = u64::MAX;

/// `flag` bit meaning the slot's payload differs from what the backend holds.
pub(crate) const DIRTY: u8 = 0x1;

/// A single cache entry: one `blocksize`-byte buffer plus its metadata.
///
/// `bid`/`file` and `addr`/`flag` live under one slot-level mutex rather than
/// two distinct locks: simpler to reason about in safe Rust, and it does not
/// change the mandated acquisition order (registry lock → per-file lock →
/// per-slot lock) since nothing here ever acquires the per-file lock while
/// holding this one.
pub(crate) struct Slot {
    pub(crate) id: SlotId,
    inner: Mutex<SlotInner>,
}

pub(crate) struct SlotInner {
    pub(crate) buf: AlignedBuffer,
    pub(crate) bid: u64,
    pub(crate) file: Option<Weak<FileIndex>>,
    pub(crate) flag: u8,
}

impl Slot {
    pub(crate) fn inner(&self) -> &Mutex<SlotInner> {
        &self.inner
    }
}

impl SlotInner {
    pub(crate) fn is_dirty(&self) -> bool {
        self.flag & DIRTY != 0
    }
}

/// The fixed pool of `nblock` slots allocated at construction time.
pub(crate) struct SlotPool {
    slots: Vec<Arc<Slot>>,
    free: Mutex<Vec<SlotId>>,
    blocksize: usize,
}

impl SlotPool {
    pub(crate) fn new(nblock: usize, blocksize: usize) -> Self {
        let slots: Vec<Arc<Slot>> = (0..nblock)
            .map(|id| {
                Arc::new(Slot {
                    id,
                    inner: Mutex::new(SlotInner {
                        buf: AlignedBuffer::new(blocksize),
                        bid: BLK_NOT_FOUND,
                        file: None,
                        flag: 0,
                    }),
                })
            })
            .collect();
        let free = (0..nblock).collect();
        Self {
            slots,
            free: Mutex::new(free),
            blocksize,
        }
    }

    /// Removes and returns a slot from the free list, or `None` if exhausted.
    /// Never waits — the caller is expected to run eviction and retry.
    pub(crate) fn acquire(&self) -> Option<Arc<Slot>> {
        let mut free = self.free.lock();
        free.pop().map(|id| self.slots[id].clone())
    }

    pub(crate) fn release(&self, id: SlotId) {
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&id), "slot released twice");
        free.push(id);
    }

    pub(crate) fn get(&self, id: SlotId) -> Arc<Slot> {
        self.slots[id].clone()
    }

    pub(crate) fn nblock(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn blocksize(&self) -> usize {
        self.blocksize
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}
