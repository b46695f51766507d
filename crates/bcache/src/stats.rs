//! Lock-free observability counters.
//!
//! A small public snapshot type built from plain `AtomicU64` fields,
//! `Relaxed` ordering throughout since these are observational counters with
//! no downstream decision depending on their exact interleaving.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for a [`crate::cache::BCache`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub blocks_written_back: u64,
    pub bytes_written_back: u64,
}

#[derive(Default)]
pub(crate) struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    blocks_written_back: AtomicU64,
    bytes_written_back: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writeback(&self, blocks: u64, bytes: u64) {
        self.blocks_written_back.fetch_add(blocks, Ordering::Relaxed);
        self.bytes_written_back.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            blocks_written_back: self.blocks_written_back.load(Ordering::Relaxed),
            bytes_written_back: self.bytes_written_back.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter. Observational only — has no effect on cached
    /// state.
    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.blocks_written_back.store(0, Ordering::Relaxed);
        self.bytes_written_back.store(0, Ordering::Relaxed);
    }
}

impl CacheStatsSnapshot {
    /// Fraction of `read`/`partial_write` lookups that hit, in `[0.0, 1.0]`.
    /// `0.0` when no lookups have been recorded yet.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = CacheStats::default();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.record_writeback(3, 12288);

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.blocks_written_back, 3);
        assert_eq!(snap.bytes_written_back, 12288);
    }

    #[test]
    fn reset_zeroes_every_counter() {
        let stats = CacheStats::default();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction();
        stats.record_writeback(1, 4096);

        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.evictions, 0);
        assert_eq!(snap.blocks_written_back, 0);
        assert_eq!(snap.bytes_written_back, 0);
    }

    #[test]
    fn hit_ratio_is_zero_with_no_lookups() {
        assert_eq!(CacheStatsSnapshot::default().hit_ratio(), 0.0);
    }

    #[test]
    fn hit_ratio_reflects_hits_over_total_lookups() {
        let stats = CacheStats::default();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.snapshot().hit_ratio(), 0.75);
    }
}
