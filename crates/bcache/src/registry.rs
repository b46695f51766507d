//! The file registry: global lookup from file identity to per-file index,
//! plus the file-level LRU used to pick an eviction victim.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::backend::FileHandle;
use crate::file_index::{FileIndex, FileKey, ListMembership};
use crate::lru_list::LruList;

struct FileLists {
    file_lru: LruList<Arc<FileIndex>>,
    file_empty: LruList<Arc<FileIndex>>,
}

pub(crate) struct FileRegistry {
    /// The outer lock held while a victim file is being chosen.
    fnamedic: Mutex<HashMap<FileKey, Arc<FileIndex>>>,
    lists: Mutex<FileLists>,
}

impl FileRegistry {
    pub(crate) fn new() -> Self {
        Self {
            fnamedic: Mutex::new(HashMap::new()),
            lists: Mutex::new(FileLists {
                file_lru: LruList::new(),
                file_empty: LruList::new(),
            }),
        }
    }

    /// `bcache_lock`, exposed directly so the eviction engine can hold it
    /// across its own multi-step victim-selection loop.
    pub(crate) fn bcache_guard(&self) -> MutexGuard<'_, HashMap<FileKey, Arc<FileIndex>>> {
        self.fnamedic.lock()
    }

    pub(crate) fn lookup_existing(&self, handle: &Arc<dyn FileHandle>) -> Option<Arc<FileIndex>> {
        let key: FileKey = Arc::from(handle.filename());
        let idx = self.fnamedic.lock().get(&key).cloned();
        if let Some(idx) = &idx {
            idx.rebind(handle);
        }
        idx
    }

    pub(crate) fn find_or_create(&self, handle: &Arc<dyn FileHandle>) -> Arc<FileIndex> {
        let key: FileKey = Arc::from(handle.filename());
        let mut dic = self.fnamedic.lock();
        if let Some(existing) = dic.get(&key) {
            existing.rebind(handle);
            return existing.clone();
        }
        let idx = FileIndex::new(key.clone(), handle);
        tracing::debug!(filename = %idx.filename_lossy(), "created per-file cache index");
        dic.insert(key, idx.clone());
        idx
    }

    pub(crate) fn remove(&self, handle: &Arc<dyn FileHandle>) -> Option<Arc<FileIndex>> {
        let key: FileKey = Arc::from(handle.filename());
        self.fnamedic.lock().remove(&key)
    }

    pub(crate) fn touch(&self, idx: &Arc<FileIndex>) {
        let mut lists = self.lists.lock();
        Self::detach_locked(&mut lists, idx);
        lists.file_lru.push_front(idx.clone());
        idx.set_current_list(ListMembership::FileLru);
    }

    pub(crate) fn move_to_empty(&self, idx: &Arc<FileIndex>) {
        let mut lists = self.lists.lock();
        Self::detach_locked(&mut lists, idx);
        lists.file_empty.push_front(idx.clone());
        idx.set_current_list(ListMembership::FileEmpty);
    }

    /// Fully unlinks `idx` from whichever registry list it is on, without
    /// relinking it anywhere. Used by `remove_file`.
    pub(crate) fn detach(&self, idx: &Arc<FileIndex>) {
        let mut lists = self.lists.lock();
        Self::detach_locked(&mut lists, idx);
        idx.set_current_list(ListMembership::None);
    }

    fn detach_locked(lists: &mut FileLists, idx: &Arc<FileIndex>) {
        match idx.current_list() {
            ListMembership::FileLru => lists.file_lru.remove(idx),
            ListMembership::FileEmpty => lists.file_empty.remove(idx),
            ListMembership::None => {}
        }
    }

    /// Returns the tail of `file_lru`, or the head of `file_empty` if that
    /// candidate is actually empty right now (the race guard described in
    /// the eviction design notes).
    pub(crate) fn pick_victim(&self) -> Option<Arc<FileIndex>> {
        let lists = self.lists.lock();
        if let Some(v) = lists.file_lru.peek_back() {
            return Some(v);
        }
        if let Some(v) = lists.file_empty.peek_front() {
            if v.is_probably_empty() {
                return Some(v);
            }
        }
        None
    }
}
