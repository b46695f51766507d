//! The public block cache API.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::backend::FileHandle;
use crate::config::BCacheConfig;
use crate::eviction;
use crate::file_index::{FileIndex, FileIndexState};
use crate::registry::FileRegistry;
use crate::slot::{Slot, SlotId, SlotPool, DIRTY};
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// Whether a `write` should leave the block clean (as if freshly read from
/// the backend) or mark it dirty (pending writeback).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteMode {
    Clean,
    Dirty,
}

/// An in-memory cache of fixed-size blocks across any number of files.
///
/// Every operation is keyed by an `Arc<dyn FileHandle>`; two handles with
/// byte-identical filenames name the same cache entry regardless of how many
/// times the upstream has opened and closed the underlying file.
pub struct BCache {
    pool: SlotPool,
    registry: FileRegistry,
    blocksize: usize,
    flush_unit: usize,
    stats: CacheStats,
}

impl BCache {
    /// Allocates the slot pool and registries. Allocation failure while
    /// building the pool is fatal (the global allocator aborts the process),
    /// matching the source's "cache cannot start" policy — there is nothing
    /// for an `Err` return to express once no cache has ever existed.
    pub fn new(config: BCacheConfig) -> bcache_common::Result<Self> {
        config.validate()?;
        tracing::debug!(
            nblock = config.nblock,
            blocksize = config.blocksize,
            flush_unit = config.flush_unit,
            "initializing block cache"
        );
        Ok(Self {
            pool: SlotPool::new(config.nblock, config.blocksize),
            registry: FileRegistry::new(),
            blocksize: config.blocksize,
            flush_unit: config.flush_unit,
            stats: CacheStats::default(),
        })
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    pub fn nblock(&self) -> usize {
        self.pool.nblock()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Zeroes every counter in [`BCache::stats`]. Purely observational —
    /// does not touch any cached block, list, or index.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Looks up `bid` in `file`'s index. Returns 0 (not an error) if the
    /// file or the block is not cached. On a hit, promotes the block within
    /// the clean-LRU unless it is dirty (dirty blocks are never reordered by
    /// reads), then copies `blocksize` bytes into `buf`.
    pub fn read(&self, file: &Arc<dyn FileHandle>, bid: u64, buf: &mut [u8]) -> usize {
        debug_assert!(buf.len() >= self.blocksize, "read buffer too small");

        let Some(idx) = self.registry.lookup_existing(file) else {
            self.stats.record_miss();
            return 0;
        };
        self.registry.touch(&idx);

        let slot_id = {
            let mut state = idx.state().lock();
            let Some(&id) = state.lookup.get(&bid) else {
                self.stats.record_miss();
                return 0;
            };
            if !state.is_dirty(bid) {
                state.promote_clean(id);
            }
            id
        };

        let slot = self.pool.get(slot_id);
        let inner = slot.inner().lock();
        buf[..self.blocksize].copy_from_slice(inner.buf.as_slice());
        self.stats.record_hit();
        self.blocksize
    }

    /// Writes `buf` into the cached copy of `(file, bid)`, creating both the
    /// per-file index and the slot if necessary (acquiring one via eviction
    /// if the pool is exhausted). `mode == Dirty` marks the block pending
    /// writeback; `mode == Clean` never demotes an already-dirty block.
    ///
    /// `idx`'s lock is held continuously from the hash lookup through the
    /// clean/dirty list transition, released only for the slot-level payload
    /// copy, so that a concurrent writer to a different `bid` on this file
    /// can never pick this in-flight slot as an eviction victim between
    /// "located" and "transitioned".
    pub fn write(
        &self,
        file: &Arc<dyn FileHandle>,
        bid: u64,
        buf: &[u8],
        mode: WriteMode,
    ) -> usize {
        debug_assert!(buf.len() >= self.blocksize, "write buffer too small");

        let idx = self.registry.find_or_create(file);
        self.registry.touch(&idx);

        let slot_id = self.locate_or_install(&idx, bid, mode);

        let slot = self.pool.get(slot_id);
        let mut inner = slot.inner().lock();
        if mode == WriteMode::Dirty {
            inner.flag |= DIRTY;
        }
        inner.buf.as_mut_slice()[..self.blocksize].copy_from_slice(&buf[..self.blocksize]);
        self.blocksize
    }

    /// Finds `bid` in `idx`, installing a freshly acquired slot for it if
    /// necessary, and applies `mode`'s clean/dirty transition — all under
    /// one continuous hold of `idx.state()`'s lock. The lock is released
    /// only while a slot is actually being reclaimed by eviction (which may
    /// choose `idx` itself as victim and so must not be called while its
    /// lock is held); the lookup is re-checked immediately after
    /// re-acquiring, since a concurrent writer may have installed the same
    /// `(file, bid)` in the meantime, in which case the freshly evicted slot
    /// is simply returned to the pool.
    fn locate_or_install(&self, idx: &Arc<FileIndex>, bid: u64, mode: WriteMode) -> SlotId {
        let mut state = idx.state().lock();
        loop {
            if let Some(&id) = state.lookup.get(&bid) {
                if !state.is_dirty(bid) {
                    match mode {
                        WriteMode::Dirty => state.promote_to_dirty(bid, id),
                        WriteMode::Clean => state.promote_clean(id),
                    }
                }
                // already dirty && Clean requested: never demote, leave as-is.
                return id;
            }

            match self.pool.acquire() {
                Some(slot) => {
                    Self::install_new_slot(&mut state, idx, bid, &slot);
                }
                None => {
                    drop(state);
                    let slot = eviction::evict(
                        &self.pool,
                        &self.registry,
                        self.blocksize,
                        self.flush_unit,
                        &self.stats,
                    );
                    state = idx.state().lock();
                    if state.lookup.contains_key(&bid) {
                        self.pool.release(slot.id);
                    } else {
                        Self::install_new_slot(&mut state, idx, bid, &slot);
                    }
                }
            }
            // Loop back: the slot for `bid` is now present (either just
            // installed, or installed concurrently by another writer), so
            // the next iteration takes the hit branch above.
        }
    }

    /// Binds a freshly acquired, currently-unowned slot to `(idx, bid)` and
    /// links it clean. Caller already holds `idx.state()`'s lock.
    fn install_new_slot(state: &mut FileIndexState, idx: &Arc<FileIndex>, bid: u64, slot: &Arc<Slot>) {
        {
            let mut inner = slot.inner().lock();
            inner.bid = bid;
            inner.file = Some(Arc::downgrade(idx));
            inner.flag = 0;
        }
        state.insert_clean(bid, slot.id);
        idx.occupancy().fetch_add(1, Ordering::Relaxed);
    }

    /// Requires the block to already be cached; returns 0 on miss (the
    /// caller is expected to fault it in with `write(..., Clean)` first).
    /// Unconditionally promotes the block to dirty, then copies `len` bytes
    /// from `buf` into the slot at `offset`.
    pub fn partial_write(
        &self,
        file: &Arc<dyn FileHandle>,
        bid: u64,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> usize {
        debug_assert!(offset + len <= self.blocksize, "partial write out of bounds");

        let Some(idx) = self.registry.lookup_existing(file) else {
            self.stats.record_miss();
            return 0;
        };

        let slot_id = {
            let mut state = idx.state().lock();
            let Some(&id) = state.lookup.get(&bid) else {
                self.stats.record_miss();
                return 0;
            };
            if !state.is_dirty(bid) {
                state.promote_to_dirty(bid, id);
            }
            id
        };
        self.registry.touch(&idx);

        let slot = self.pool.get(slot_id);
        let mut inner = slot.inner().lock();
        inner.flag |= DIRTY;
        inner.buf.as_mut_slice()[offset..offset + len].copy_from_slice(&buf[..len]);
        self.stats.record_hit();
        len
    }

    /// Drains the dirty index via coalesced writeback until empty. Blocks
    /// become clean, not freed.
    pub fn flush(&self, file: &Arc<dyn FileHandle>) {
        let Some(idx) = self.registry.lookup_existing(file) else {
            return;
        };
        loop {
            let mut state = idx.state().lock();
            if state.dirty_index.is_empty() {
                return;
            }
            eviction::evict_dirty_locked(
                &self.pool,
                &mut state,
                &idx,
                true,
                self.blocksize,
                self.flush_unit,
                &self.stats,
            );
        }
    }

    /// Discards dirty contents without writing them back.
    pub fn remove_dirty_blocks(&self, file: &Arc<dyn FileHandle>) {
        let Some(idx) = self.registry.lookup_existing(file) else {
            return;
        };
        {
            let mut state = idx.state().lock();
            while !state.dirty_index.is_empty() {
                eviction::evict_dirty_locked(
                    &self.pool,
                    &mut state,
                    &idx,
                    false,
                    self.blocksize,
                    self.flush_unit,
                    &self.stats,
                );
            }
        }
        if idx.state().lock().is_empty() {
            self.registry.move_to_empty(&idx);
        }
    }

    /// Walks the clean-LRU, returning every slot to the pool.
    pub fn remove_clean_blocks(&self, file: &Arc<dyn FileHandle>) {
        let Some(idx) = self.registry.lookup_existing(file) else {
            return;
        };
        {
            let mut state = idx.state().lock();
            while let Some(slot_id) = state.clean_list.pop_back() {
                let slot = self.pool.get(slot_id);
                let bid = {
                    let mut inner = slot.inner().lock();
                    let bid = inner.bid;
                    inner.bid = crate::slot::BLK_NOT_FOUND;
                    inner.file = None;
                    inner.flag = 0;
                    bid
                };
                state.lookup.remove(&bid);
                idx.occupancy().fetch_sub(1, Ordering::Relaxed);
                self.pool.release(slot_id);
            }
        }
        if idx.state().lock().is_empty() {
            self.registry.move_to_empty(&idx);
        }
    }

    /// Removes the per-file index from the registry. Asserts (per the
    /// error-handling design: this is a caller bug, not a recoverable
    /// condition) that no cached blocks remain.
    ///
    /// The precondition is checked *before* the index is unregistered: if it
    /// fired after unregistering, a caller that wraps this call in
    /// `catch_unwind` would be left with the file permanently missing from
    /// the registry (a later `find_or_create` for the same name would
    /// silently fabricate a second, disconnected index) while the original,
    /// still-occupied index dangled on `file_lru`/`file_empty` forever.
    pub fn remove_file(&self, file: &Arc<dyn FileHandle>) {
        let Some(idx) = self.registry.lookup_existing(file) else {
            return;
        };
        {
            let state = idx.state().lock();
            assert!(
                state.is_empty(),
                "remove_file called on {:?} while blocks are still cached (fatal)",
                idx.filename_lossy()
            );
        }
        self.registry.remove(file);
        self.registry.detach(&idx);
        tracing::debug!(file = %idx.filename_lossy(), "removed per-file cache index");
    }

    /// Consumes the cache. Dropping does the same work; this exists so
    /// shutdown is an explicit, named step in the API surface like the rest
    /// of the public operations.
    pub fn shutdown(self) {
        tracing::debug!(nblock = self.nblock(), "shutting down block cache");
    }
}
