//! The per-file dual index: a clean-LRU list plus an ordered dirty index,
//! both backed by a single lookup table from `bid` to slot.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::FileHandle;
use crate::lru_list::LruList;
use crate::slot::SlotId;

/// Filename bytes, shared cheaply between the registry's hash map and the
/// list nodes that reference a [`FileIndex`] by identity.
pub(crate) type FileKey = Arc<[u8]>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ListMembership {
    None,
    FileLru,
    FileEmpty,
}

/// The four structures protected together by a [`FileIndex`]'s lock.
pub(crate) struct FileIndexState {
    pub(crate) current_file: Option<Weak<dyn FileHandle>>,
    pub(crate) clean_list: LruList<SlotId>,
    pub(crate) dirty_index: BTreeMap<u64, SlotId>,
    pub(crate) lookup: HashMap<u64, SlotId>,
}

impl FileIndexState {
    pub(crate) fn is_empty(&self) -> bool {
        self.clean_list.is_empty() && self.dirty_index.is_empty()
    }

    pub(crate) fn is_dirty(&self, bid: u64) -> bool {
        self.dirty_index.contains_key(&bid)
    }

    /// Links a brand-new slot into the clean list and the lookup table.
    /// Occupancy bookkeeping is the caller's responsibility since only the
    /// caller knows whether this is genuinely a new `(file, bid)` pair.
    pub(crate) fn insert_clean(&mut self, bid: u64, slot: SlotId) {
        self.clean_list.push_front(slot);
        self.lookup.insert(bid, slot);
    }

    /// Moves a cached-but-clean slot to the head of the dirty index.
    pub(crate) fn promote_to_dirty(&mut self, bid: u64, slot: SlotId) {
        debug_assert!(
            !self.dirty_index.contains_key(&bid),
            "double-insert of dirty block {bid} (fatal)"
        );
        self.clean_list.remove(&slot);
        self.dirty_index.insert(bid, slot);
    }

    /// Moves the slot to the most-recently-used end of the clean list.
    pub(crate) fn promote_clean(&mut self, slot: SlotId) {
        self.clean_list.remove(&slot);
        self.clean_list.push_front(slot);
    }

    /// Removes a slot entirely — from whichever list it is in, and from
    /// `lookup`. Used when a slot is being handed back to the free pool.
    pub(crate) fn unlink(&mut self, bid: u64, slot: SlotId) {
        self.clean_list.remove(&slot);
        self.dirty_index.remove(&bid);
        self.lookup.remove(&bid);
    }
}

/// One file's worth of cached blocks.
pub struct FileIndex {
    filename: FileKey,
    hash: u64,
    state: Mutex<FileIndexState>,
    /// Lock-free approximation of `state.is_empty()`, used only as the
    /// victim-selection race guard in [`crate::registry::FileRegistry::pick_victim`],
    /// which runs under `filelist_lock` and must not acquire this index's own
    /// lock (a leaf lock may never be held while acquiring another). The
    /// authoritative check still happens under `state`'s lock once a
    /// candidate victim is settled on.
    occupancy: AtomicUsize,
    current_list: Mutex<ListMembership>,
}

impl FileIndex {
    pub(crate) fn new(filename: FileKey, handle: &Arc<dyn FileHandle>) -> Arc<Self> {
        let hash = xxhash_rust::xxh64::xxh64(&filename, 0);
        Arc::new(Self {
            filename,
            hash,
            state: Mutex::new(FileIndexState {
                current_file: Some(Arc::downgrade(handle)),
                clean_list: LruList::new(),
                dirty_index: BTreeMap::new(),
                lookup: HashMap::new(),
            }),
            occupancy: AtomicUsize::new(0),
            current_list: Mutex::new(ListMembership::None),
        })
    }

    pub(crate) fn state(&self) -> &Mutex<FileIndexState> {
        &self.state
    }

    pub(crate) fn occupancy(&self) -> &AtomicUsize {
        &self.occupancy
    }

    pub(crate) fn is_probably_empty(&self) -> bool {
        self.occupancy.load(Ordering::Relaxed) == 0
    }

    pub(crate) fn current_list(&self) -> ListMembership {
        *self.current_list.lock()
    }

    pub(crate) fn set_current_list(&self, membership: ListMembership) {
        *self.current_list.lock() = membership;
    }

    /// Rebinds the live handle, e.g. when the upstream closes and reopens
    /// the same logical file under the same name.
    pub(crate) fn rebind(&self, handle: &Arc<dyn FileHandle>) {
        self.state.lock().current_file = Some(Arc::downgrade(handle));
    }

    pub fn filename(&self) -> &[u8] {
        &self.filename
    }

    pub fn filename_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.filename)
    }
}

impl PartialEq for FileIndex {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
    }
}

impl Eq for FileIndex {}

impl std::hash::Hash for FileIndex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for FileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndex")
            .field("filename", &self.filename_lossy())
            .finish()
    }
}
