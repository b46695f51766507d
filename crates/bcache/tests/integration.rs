//! End-to-end scenarios exercised through the public `BCache` API only.

use std::sync::{Arc, Mutex};

use bcache::{BCache, BCacheConfig, FileHandle, WriteMode};
use bcache_common::{Result, BLK_MARKER_BNODE};

/// An in-memory stand-in for a real open file: records every `pwrite` and
/// keeps its own view of "what the backend holds" so tests can assert
/// against it independently of the cache.
struct MockBackend {
    name: &'static str,
    calls: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MockBackend {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(u64, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }

    fn as_handle(self: &Arc<Self>) -> Arc<dyn FileHandle> {
        self.clone()
    }
}

impl FileHandle for MockBackend {
    fn filename(&self) -> &[u8] {
        self.name.as_bytes()
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.calls.lock().unwrap().push((offset, buf.to_vec()));
        Ok(buf.len())
    }
}

fn cache(nblock: usize, blocksize: usize, flush_unit: usize) -> BCache {
    BCache::new(
        BCacheConfig::default()
            .with_nblock(nblock)
            .with_blocksize(blocksize)
            .with_flush_unit(flush_unit),
    )
    .unwrap()
}

#[test]
fn scenario_single_write_read_round_trip() {
    let c = cache(16, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    let payload = vec![0x5au8; 4096];
    assert_eq!(c.write(&f, 42, &payload, WriteMode::Dirty), 4096);

    let mut out = vec![0u8; 4096];
    assert_eq!(c.read(&f, 42, &mut out), 4096);
    assert_eq!(out, payload);

    // Nothing hits the backend until flush.
    assert!(backend.calls().is_empty());
}

#[test]
fn scenario_coalesced_writeback_for_contiguous_run() {
    let c = cache(16, 4096, 3 * 4096);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    for bid in 10..=13u64 {
        let buf = vec![bid as u8; 4096];
        c.write(&f, bid, &buf, WriteMode::Dirty);
    }
    c.flush(&f);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, 10 * 4096);
    assert_eq!(calls[0].1.len(), 3 * 4096);
    assert_eq!(calls[1].0, 13 * 4096);
    assert_eq!(calls[1].1.len(), 4096);
}

#[test]
fn scenario_non_contiguous_blocks_stop_the_run() {
    let c = cache(16, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    for bid in [5u64, 6, 9] {
        let buf = vec![bid as u8; 4096];
        c.write(&f, bid, &buf, WriteMode::Dirty);
    }
    c.flush(&f);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, 5 * 4096);
    assert_eq!(calls[0].1.len(), 2 * 4096);
    assert_eq!(calls[1].0, 9 * 4096);
    assert_eq!(calls[1].1.len(), 4096);
}

#[test]
fn scenario_eviction_under_pressure_reclaims_lru_block() {
    let c = cache(2, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    let buf = vec![1u8; 4096];
    c.write(&f, 0, &buf, WriteMode::Clean);
    c.write(&f, 1, &buf, WriteMode::Clean);
    // Pool is full; reading block 0 again keeps it hot, block 1 becomes LRU.
    let mut out = vec![0u8; 4096];
    c.read(&f, 0, &mut out);
    c.write(&f, 2, &buf, WriteMode::Clean);

    // Block 1 was the least-recently-used clean block and should be gone.
    assert_eq!(c.read(&f, 1, &mut out), 0);
    assert_eq!(c.read(&f, 0, &mut out), 4096);
    assert_eq!(c.read(&f, 2, &mut out), 4096);
    assert_eq!(c.stats().evictions, 1);
}

#[test]
fn scenario_dirty_eviction_writes_back_before_reclaiming() {
    let c = cache(1, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    let first = vec![0x11u8; 4096];
    let second = vec![0x22u8; 4096];
    c.write(&f, 0, &first, WriteMode::Dirty);
    // Only one slot exists; this write must evict block 0, writing it back.
    c.write(&f, 1, &second, WriteMode::Dirty);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 0);
    assert_eq!(calls[0].1, first);

    let mut out = vec![0u8; 4096];
    assert_eq!(c.read(&f, 0, &mut out), 0);
    assert_eq!(c.read(&f, 1, &mut out), 4096);
    assert_eq!(out, second);
}

#[test]
fn scenario_checksum_injected_for_marked_blocks_only() {
    let c = cache(4, 4096, 3 * 4096);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    let mut marked = vec![0x33u8; 4096];
    marked[4095] = BLK_MARKER_BNODE;
    let plain = vec![0x44u8; 4096];

    c.write(&f, 0, &marked, WriteMode::Dirty);
    c.write(&f, 1, &plain, WriteMode::Dirty);
    c.flush(&f);

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    let written = &calls[0].1;
    // Marked block: checksum field must differ from the all-0xff reset value.
    assert_ne!(&written[8..12], &[0xff, 0xff, 0xff, 0xff]);
    // Plain block is untouched past its original payload.
    assert_eq!(&written[4096 + 0..4096 + 8], &plain[0..8]);
}

#[test]
fn law_write_is_idempotent_under_repeated_identical_writes() {
    let c = cache(4, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();
    let buf = vec![9u8; 4096];

    for _ in 0..5 {
        c.write(&f, 3, &buf, WriteMode::Clean);
    }
    c.remove_clean_blocks(&f);
    c.remove_file(&f);
}

#[test]
fn law_clean_write_never_demotes_a_dirty_block() {
    let c = cache(4, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    c.write(&f, 0, &vec![1u8; 4096], WriteMode::Dirty);
    c.write(&f, 0, &vec![2u8; 4096], WriteMode::Clean);
    c.flush(&f);

    // The block was still dirty, so flush must have produced a writeback.
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn law_flush_leaves_blocks_clean_and_present() {
    let c = cache(4, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    c.write(&f, 0, &vec![1u8; 4096], WriteMode::Dirty);
    c.flush(&f);
    assert!(backend.calls().len() == 1);

    // A second flush finds nothing left dirty.
    c.flush(&f);
    assert_eq!(backend.calls().len(), 1);

    let mut out = vec![0u8; 4096];
    assert_eq!(c.read(&f, 0, &mut out), 4096);
}

#[test]
fn law_remove_dirty_blocks_drops_state_without_touching_the_backend() {
    let c = cache(4, 4096, 64 * 1024);
    let backend = MockBackend::new("data.db");
    let f = backend.as_handle();

    c.write(&f, 0, &vec![1u8; 4096], WriteMode::Dirty);
    c.write(&f, 1, &vec![2u8; 4096], WriteMode::Dirty);
    c.remove_dirty_blocks(&f);

    assert!(backend.calls().is_empty());
    // The blocks are now clean (not evicted), so they still read back.
    let mut out = vec![0u8; 4096];
    assert_eq!(c.read(&f, 0, &mut out), 4096);
    assert_eq!(c.read(&f, 1, &mut out), 4096);
}

#[test]
fn multiple_files_get_independent_clean_lru_order() {
    let c = cache(3, 4096, 64 * 1024);
    let a = MockBackend::new("a.db");
    let b = MockBackend::new("b.db");
    let fa = a.as_handle();
    let fb = b.as_handle();

    let buf = vec![1u8; 4096];
    c.write(&fa, 0, &buf, WriteMode::Clean);
    c.write(&fa, 1, &buf, WriteMode::Clean);
    c.write(&fb, 0, &buf, WriteMode::Clean);

    // file_lru now has b (most recent write) ahead of a; a is evicted first.
    c.write(&fb, 1, &buf, WriteMode::Clean);

    let mut out = vec![0u8; 4096];
    assert_eq!(c.read(&fa, 0, &mut out), 0);
}
