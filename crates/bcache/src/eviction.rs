//! Victim selection and dirty-coalescing writeback.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bcache_common::{inject_bnode_checksum, BLK_MARKER_BNODE};

use crate::buffer::AlignedBuffer;
use crate::file_index::{FileIndex, FileIndexState};
use crate::registry::FileRegistry;
use crate::slot::{Slot, SlotPool, BLK_NOT_FOUND, DIRTY};
use crate::stats::CacheStats;

/// Frees one slot, taking it from whichever file currently holds it.
///
/// Never fails: if no file has a clean block to give up, dirty blocks are
/// written back (or discarded, see [`evict_dirty_locked`]) until one does.
/// The returned slot is fully reset (`bid = BLK_NOT_FOUND`, no file, no
/// flags) and is not on the free list — the caller installs it directly.
pub(crate) fn evict(
    pool: &SlotPool,
    registry: &FileRegistry,
    blocksize: usize,
    flush_unit: usize,
    stats: &CacheStats,
) -> Arc<Slot> {
    loop {
        let Some(victim) = select_victim(registry) else {
            // Momentarily quiescent: every file is either truly empty or
            // about to be relinked by a concurrent operation. Yield and
            // retry rather than spin hot.
            std::thread::yield_now();
            continue;
        };

        let mut state = victim.state().lock();
        let slot_id = loop {
            if let Some(id) = state.clean_list.pop_back() {
                break id;
            }
            evict_dirty_locked(pool, &mut state, &victim, true, blocksize, flush_unit, stats);
        };

        let slot = pool.get(slot_id);
        let bid = slot.inner().lock().bid;
        state.lookup.remove(&bid);
        let now_empty = state.is_empty();
        drop(state);

        victim.occupancy().fetch_sub(1, Ordering::Relaxed);
        if now_empty {
            registry.move_to_empty(&victim);
        }

        let mut inner = slot.inner().lock();
        inner.bid = BLK_NOT_FOUND;
        inner.file = None;
        inner.flag = 0;
        drop(inner);

        stats.record_eviction();
        tracing::debug!(file = %victim.filename_lossy(), slot = slot_id, "evicted slot");
        return slot;
    }
}

/// Chooses a victim file and holds `bcache_lock` for the whole selection,
/// re-validating emptiness against `file_empty` candidates before
/// committing. Returns `None` if nothing is currently reclaimable.
fn select_victim(registry: &FileRegistry) -> Option<Arc<FileIndex>> {
    let _bcache_guard = registry.bcache_guard();
    loop {
        match registry.pick_victim() {
            None => return None,
            Some(candidate) => {
                if candidate.state().lock().is_empty() {
                    registry.move_to_empty(&candidate);
                    continue;
                }
                return Some(candidate);
            }
        }
    }
}

/// Drains a run of the dirty index, converting each block to clean.
///
/// When `sync` is true, the run is bounded to contiguous `bid`s up to
/// `flush_unit` bytes and written back with a single `pwrite`; when false
/// (used by `remove_dirty_blocks`) the entire dirty index is drained in one
/// call with no I/O, since nothing bounds how much can be safely discarded.
pub(crate) fn evict_dirty_locked(
    pool: &SlotPool,
    state: &mut FileIndexState,
    file: &FileIndex,
    sync: bool,
    blocksize: usize,
    flush_unit: usize,
    stats: &CacheStats,
) {
    let mut run: Vec<(u64, crate::slot::SlotId)> = Vec::new();
    let mut prev_bid: Option<u64> = None;
    for (&bid, &slot_id) in state.dirty_index.iter() {
        if sync {
            if let Some(prev) = prev_bid {
                if bid != prev + 1 {
                    break;
                }
            }
        }
        run.push((bid, slot_id));
        prev_bid = Some(bid);
        if sync && run.len() * blocksize >= flush_unit {
            break;
        }
    }
    if run.is_empty() {
        return;
    }

    let mut staging = sync.then(|| AlignedBuffer::new(run.len() * blocksize));

    for (i, &(bid, slot_id)) in run.iter().enumerate() {
        let slot = pool.get(slot_id);
        let mut inner = slot.inner().lock();
        inner.flag &= !DIRTY;
        if let Some(staging) = staging.as_mut() {
            let marker = inner.buf.as_slice()[blocksize - 1];
            if marker == BLK_MARKER_BNODE {
                inject_bnode_checksum(inner.buf.as_mut_slice());
            }
            staging.as_mut_slice()[i * blocksize..(i + 1) * blocksize]
                .copy_from_slice(inner.buf.as_slice());
        }
        drop(inner);
        state.dirty_index.remove(&bid);
        state.clean_list.push_front(slot_id);
    }

    if let Some(staging) = staging {
        let start_bid = run[0].0;
        let handle = state.current_file.as_ref().and_then(|w| w.upgrade());
        if let Some(handle) = handle {
            let offset = start_bid * blocksize as u64;
            let result = handle.pwrite(staging.as_slice(), offset);
            let written = match result {
                Ok(n) => n,
                Err(err) => {
                    tracing::error!(
                        file = %file.filename_lossy(),
                        %offset,
                        len = staging.len(),
                        error = %err,
                        "backend write failed during coalesced writeback"
                    );
                    panic!("backend write failed during coalesced writeback (fatal): {err}");
                }
            };
            assert_eq!(
                written,
                staging.len(),
                "short write to backend for file {:?} at offset {offset} (fatal)",
                file.filename_lossy()
            );
            tracing::debug!(
                file = %file.filename_lossy(),
                %offset,
                len = staging.len(),
                blocks = run.len(),
                "coalesced writeback"
            );
            stats.record_writeback(run.len() as u64, staging.len() as u64);
        }
    }
}
